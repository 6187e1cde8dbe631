//! Deoptimization anchor resolution
//!
//! Decides where in the original `main` body the committed fast path resumes.
//! Source lines in a trace count operations only, so labels are skipped when
//! mapping a line number back to an index in the instruction list.

use crate::ir::{Instruction, SUCCESS};
use std::fmt;
use tracing::{debug, warn};

/// Why the anchor was placed at the start of the body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorFallback {
    /// The trace carried no source line
    NoHint,
    /// The line points past the last operation of the body
    Overrun { requested: usize, available: usize },
}

impl fmt::Display for AnchorFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnchorFallback::NoHint => write!(f, "no resume line"),
            AnchorFallback::Overrun { requested, available } => write!(
                f,
                "resume after operation {} but body has {}",
                requested, available
            ),
        }
    }
}

/// Insertion point for the `success` label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    /// Index in the full instruction list (labels included)
    pub index: usize,
    /// Set when the anchor fell back to the start of the body
    pub fallback: Option<AnchorFallback>,
}

impl Anchor {
    fn start(reason: AnchorFallback) -> Self {
        Self {
            index: 0,
            fallback: Some(reason),
        }
    }
}

/// Find the index just past the `(last_line + 1)`-th operation
pub fn resolve_anchor(instrs: &[Instruction], last_line: Option<u32>) -> Anchor {
    let Some(line) = last_line else {
        return Anchor::start(AnchorFallback::NoHint);
    };

    let target = line as usize + 1;
    let mut seen = 0;
    for (idx, instr) in instrs.iter().enumerate() {
        if instr.is_label() {
            continue;
        }
        seen += 1;
        if seen == target {
            debug!(line, index = idx + 1, "resume anchor resolved");
            return Anchor {
                index: idx + 1,
                fallback: None,
            };
        }
    }

    // TODO: anchor an overrunning line at the end of the body instead; the
    // start replays everything the trace already covered.
    warn!(line, operations = seen, "resume line overruns the body, resuming at start");
    Anchor::start(AnchorFallback::Overrun {
        requested: target,
        available: seen,
    })
}

/// Copy of `instrs` with the `success` label inserted at the anchor
pub fn insert_resume_label(instrs: &[Instruction], anchor: &Anchor) -> Vec<Instruction> {
    let index = anchor.index.min(instrs.len());
    let mut out = Vec::with_capacity(instrs.len() + 1);
    out.extend_from_slice(&instrs[..index]);
    out.push(Instruction::label(SUCCESS));
    out.extend_from_slice(&instrs[index..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Type;
    use pretty_assertions::assert_eq;

    fn op(name: &str) -> Instruction {
        Instruction::effect(name, vec![], vec![])
    }

    /// `v = const 1; br v L1 L2; L1: print v; L2: ret`
    fn scenario_body() -> Vec<Instruction> {
        vec![
            Instruction::value("const", "v", Type::Named("bool".into()), vec![]),
            Instruction::effect("br", vec!["v".into()], vec!["L1".into(), "L2".into()]),
            Instruction::label("L1"),
            Instruction::effect("print", vec!["v".into()], vec![]),
            Instruction::label("L2"),
            Instruction::effect("ret", vec![], vec![]),
        ]
    }

    #[test]
    fn test_anchor_after_branch() {
        let body = scenario_body();
        let anchor = resolve_anchor(&body, Some(1));
        assert_eq!(anchor, Anchor { index: 2, fallback: None });

        let anchored = insert_resume_label(&body, &anchor);
        assert_eq!(anchored[1], body[1]);
        assert_eq!(anchored[2], Instruction::label(SUCCESS));
        assert_eq!(anchored[3], Instruction::label("L1"));
        assert_eq!(anchored.len(), body.len() + 1);
    }

    #[test]
    fn test_labels_do_not_count() {
        let body = vec![Instruction::label("top"), op("a"), Instruction::label("mid"), op("b")];
        assert_eq!(resolve_anchor(&body, Some(0)).index, 2);
        assert_eq!(resolve_anchor(&body, Some(1)).index, 4);
    }

    #[test]
    fn test_no_hint_resumes_at_start() {
        let anchor = resolve_anchor(&scenario_body(), None);
        assert_eq!(anchor.index, 0);
        assert_eq!(anchor.fallback, Some(AnchorFallback::NoHint));
        let anchored = insert_resume_label(&scenario_body(), &anchor);
        assert_eq!(anchored[0], Instruction::label(SUCCESS));
    }

    #[test]
    fn test_overrun_resumes_at_start() {
        let anchor = resolve_anchor(&scenario_body(), Some(4));
        assert_eq!(anchor.index, 0);
        assert_eq!(
            anchor.fallback,
            Some(AnchorFallback::Overrun {
                requested: 5,
                available: 4
            })
        );
        // last operation exactly
        assert_eq!(resolve_anchor(&scenario_body(), Some(3)).index, 6);
    }

    #[test]
    fn test_fallback_display() {
        let reason = AnchorFallback::Overrun {
            requested: 9,
            available: 3,
        };
        assert_eq!(reason.to_string(), "resume after operation 9 but body has 3");
    }
}
