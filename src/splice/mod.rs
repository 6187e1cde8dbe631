//! Program splicing
//!
//! Builds the merged `main` body:
//!
//! ```text
//! speculate ... commit; jmp .success      (guarded trace)
//! .end_speculation:
//! <original body, with .success: inserted at the resume anchor>
//! ```

use crate::deopt::{insert_resume_label, resolve_anchor, Anchor};
use crate::error::{Error, Result};
use crate::guard::GuardedTrace;
use crate::ir::{Instruction, Program, END_SPECULATION, RESERVED_LABELS};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Name of the function whose body is replaced
pub const ENTRY_FUNCTION: &str = "main";

/// A merged program and where its fast path resumes
#[derive(Debug, Clone)]
pub struct Spliced {
    pub program: Program,
    pub anchor: Anchor,
    /// Instructions contributed by the guarded trace
    pub trace_instrs: usize,
}

/// Merge `trace` into a copy of `program`; `name` is used in errors and logs
pub fn splice(program: &Program, trace: &GuardedTrace, name: &str) -> Result<Spliced> {
    let main = program
        .function(ENTRY_FUNCTION)
        .ok_or_else(|| Error::missing_main(name))?;
    if main.instrs.is_empty() {
        return Err(Error::empty_main(name));
    }

    if let Some(label) = main.defines_label(RESERVED_LABELS) {
        warn!(program = name, label, "program already defines a reserved label");
    }

    let anchor = resolve_anchor(&main.instrs, trace.resume_line());
    let anchored = insert_resume_label(&main.instrs, &anchor);

    let mut body: Vec<Instruction> = trace.instructions().cloned().collect();
    let trace_instrs = body.len();
    body.reserve(anchored.len() + 1);
    body.push(Instruction::label(END_SPECULATION));
    body.extend(anchored);

    debug!(program = name, trace_instrs, anchor = anchor.index, "spliced");

    let mut merged = program.clone();
    if let Some(main) = merged.function_mut(ENTRY_FUNCTION) {
        main.instrs = body;
    }
    Ok(Spliced {
        program: merged,
        anchor,
        trace_instrs,
    })
}

/// Write a program as pretty JSON
pub fn write_program(path: impl AsRef<Path>, program: &Program) -> Result<()> {
    fs::write(path.as_ref(), program.to_json_pretty()?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::synthesize;
    use crate::ir::SUCCESS;
    use crate::trace::parse_str;
    use pretty_assertions::assert_eq;

    const PROGRAM: &str = r#"{"functions":[{"name":"main","instrs":[
        {"dest":"v","op":"const","type":"bool","value":true},
        {"op":"br","args":["v"],"labels":["L1","L2"]},
        {"label":"L1"},
        {"op":"print","args":["v"]},
        {"label":"L2"},
        {"op":"ret"}
    ]}]}"#;

    const TRACE: &str = r#"trace (line 0): {"op":"br","args":["v"],"labels":["L1","L2"]}
trace: L1
trace (line 1): {"op":"print","args":["v"]}"#;

    fn texts(instrs: &[Instruction]) -> Vec<String> {
        instrs.iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_scenario_merge() {
        let program = Program::from_json(PROGRAM).unwrap();
        let trace = synthesize(&parse_str(TRACE)).trace;
        let spliced = splice(&program, &trace, "scenario").unwrap();
        let main = spliced.program.function("main").unwrap();
        assert_eq!(
            texts(&main.instrs),
            vec![
                "speculate;",
                "guard v .end_speculation;",
                "commit;",
                "jmp .success;",
                ".end_speculation:",
                "v: bool = const true;",
                "br v .L1 .L2;",
                ".success:",
                ".L1:",
                "print v;",
                ".L2:",
                "ret;",
            ]
        );
        assert_eq!(spliced.trace_instrs, 4);
        assert_eq!(spliced.anchor.index, 2);
    }

    #[test]
    fn test_input_is_not_mutated() {
        let program = Program::from_json(PROGRAM).unwrap();
        let before = program.clone();
        let trace = synthesize(&parse_str(TRACE)).trace;
        splice(&program, &trace, "scenario").unwrap();
        assert_eq!(program, before);
    }

    #[test]
    fn test_other_functions_untouched() {
        let program = Program::from_json(
            r#"{"functions":[{"name":"f","instrs":[{"op":"ret"}]},{"name":"main","instrs":[{"op":"nop"}]}]}"#,
        )
        .unwrap();
        let trace = GuardedTrace::new(Vec::new(), None);
        let spliced = splice(&program, &trace, "p").unwrap();
        assert_eq!(spliced.program.functions[0], program.functions[0]);
        let main = spliced.program.function("main").unwrap();
        assert_eq!(main.instrs[3], Instruction::label(END_SPECULATION));
        assert_eq!(main.instrs[4], Instruction::label(SUCCESS));
        assert!(main.instrs[5].is_op("nop"));
    }

    #[test]
    fn test_missing_or_empty_main() {
        let trace = GuardedTrace::new(Vec::new(), None);
        let no_main = Program::from_json(r#"{"functions":[{"name":"f","instrs":[]}]}"#).unwrap();
        assert!(matches!(splice(&no_main, &trace, "a"), Err(Error::MissingMain { .. })));

        let empty = Program::from_json(r#"{"functions":[{"name":"main"}]}"#).unwrap();
        assert!(matches!(splice(&empty, &trace, "b"), Err(Error::EmptyMain { .. })));
    }

    #[test]
    fn test_output_is_byte_stable() {
        let program = Program::from_json(PROGRAM).unwrap();
        let trace = synthesize(&parse_str(TRACE)).trace;
        let first = splice(&program, &trace, "s").unwrap().program.to_json_pretty().unwrap();
        let second = splice(&program, &trace, "s").unwrap().program.to_json_pretty().unwrap();
        assert_eq!(first, second);
        assert!(first.ends_with("}\n"));
    }
}
