//! Instruction model for the JSON-encoded IR
//!
//! A program is a list of functions, and a function body is a flat list of
//! instructions. Each instruction is exactly one of:
//!
//! - a **label** marking a jump/branch target,
//! - a **value op** that writes a typed destination,
//! - an **effect op** that writes nothing (`print`, `jmp`, `br`, `guard`, ...).
//!
//! The wire format distinguishes these by field presence; [`Instruction`]
//! turns that into a closed enum at deserialization time.

mod raw;

use crate::error::{Error, Result};
use raw::RawInstr;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;

/// Failure target of every guard emitted by the pipeline
pub const END_SPECULATION: &str = "end_speculation";

/// Label the committed fast path jumps to
pub const SUCCESS: &str = "success";

/// Operations that end a speculative region
pub const BOUNDARY_OPS: &[&str] = &["call", "ret", "print"];

/// Labels owned by the pipeline
pub const RESERVED_LABELS: &[&str] = &[END_SPECULATION, SUCCESS];

// ---------------------------------------------------------------------------
// Type
// ---------------------------------------------------------------------------

/// A declared type: either a primitive name or a parameterized type such as
/// `{"ptr": "int"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Type {
    Named(String),
    Parameterized(BTreeMap<String, Type>),
}

impl Type {
    /// The `bool` primitive
    pub fn bool() -> Self {
        Type::Named("bool".to_string())
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Named(name) => write!(f, "{}", name),
            Type::Parameterized(params) => {
                for (i, (ctor, inner)) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}<{}>", ctor, inner)?;
                }
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Instruction
// ---------------------------------------------------------------------------

/// A jump/branch target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    /// Fields this crate does not interpret (e.g. source positions)
    pub extra: Map<String, JsonValue>,
}

/// An operation that writes a typed destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueOp {
    pub op: String,
    pub dest: String,
    pub ty: Type,
    pub args: Vec<String>,
    pub funcs: Vec<String>,
    pub labels: Vec<String>,
    /// Literal for `const`
    pub value: Option<JsonValue>,
    pub extra: Map<String, JsonValue>,
}

/// An operation executed only for its effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectOp {
    pub op: String,
    pub args: Vec<String>,
    pub funcs: Vec<String>,
    pub labels: Vec<String>,
    pub extra: Map<String, JsonValue>,
}

/// One IR instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawInstr", into = "RawInstr")]
pub enum Instruction {
    Label(Label),
    Value(ValueOp),
    Effect(EffectOp),
}

impl Instruction {
    /// A label instruction
    pub fn label(name: impl Into<String>) -> Self {
        Instruction::Label(Label {
            name: name.into(),
            extra: Map::new(),
        })
    }

    /// An effect op with the given operands and label targets
    pub fn effect(op: impl Into<String>, args: Vec<String>, labels: Vec<String>) -> Self {
        Instruction::Effect(EffectOp {
            op: op.into(),
            args,
            funcs: Vec::new(),
            labels,
            extra: Map::new(),
        })
    }

    /// A value op with the given destination, type and operands
    pub fn value(
        op: impl Into<String>,
        dest: impl Into<String>,
        ty: Type,
        args: Vec<String>,
    ) -> Self {
        Instruction::Value(ValueOp {
            op: op.into(),
            dest: dest.into(),
            ty,
            args,
            funcs: Vec::new(),
            labels: Vec::new(),
            value: None,
            extra: Map::new(),
        })
    }

    /// Enter speculative mode
    pub fn speculate() -> Self {
        Self::effect("speculate", Vec::new(), Vec::new())
    }

    /// Leave speculative mode, making buffered effects permanent
    pub fn commit() -> Self {
        Self::effect("commit", Vec::new(), Vec::new())
    }

    /// Abort speculation and jump to `fail_label` unless `cond` holds
    pub fn guard(cond: impl Into<String>, fail_label: impl Into<String>) -> Self {
        Self::effect("guard", vec![cond.into()], vec![fail_label.into()])
    }

    /// Unconditional jump
    pub fn jmp(target: impl Into<String>) -> Self {
        Self::effect("jmp", Vec::new(), vec![target.into()])
    }

    /// Boolean negation `dest: bool = not operand`
    pub fn not(dest: impl Into<String>, operand: impl Into<String>) -> Self {
        Self::value("not", dest, Type::bool(), vec![operand.into()])
    }

    /// Operator name, `None` for labels
    pub fn op(&self) -> Option<&str> {
        match self {
            Instruction::Label(_) => None,
            Instruction::Value(v) => Some(&v.op),
            Instruction::Effect(e) => Some(&e.op),
        }
    }

    /// Whether this instruction is the given operator
    pub fn is_op(&self, op: &str) -> bool {
        self.op() == Some(op)
    }

    pub fn is_label(&self) -> bool {
        matches!(self, Instruction::Label(_))
    }

    /// Label name, `None` for operations
    pub fn label_name(&self) -> Option<&str> {
        match self {
            Instruction::Label(l) => Some(&l.name),
            _ => None,
        }
    }

    /// Operand names (empty for labels)
    pub fn args(&self) -> &[String] {
        match self {
            Instruction::Label(_) => &[],
            Instruction::Value(v) => &v.args,
            Instruction::Effect(e) => &e.args,
        }
    }

    /// Label targets (empty for labels)
    pub fn labels(&self) -> &[String] {
        match self {
            Instruction::Label(_) => &[],
            Instruction::Value(v) => &v.labels,
            Instruction::Effect(e) => &e.labels,
        }
    }

    /// `call`, `ret` and `print` cannot be re-executed or undone, so a trace
    /// is cut before them
    pub fn is_speculation_boundary(&self) -> bool {
        self.op().is_some_and(|op| BOUNDARY_OPS.contains(&op))
    }

    /// Parse one instruction from a JSON string
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Compact single-line JSON encoding
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl TryFrom<RawInstr> for Instruction {
    type Error = Error;

    fn try_from(raw: RawInstr) -> Result<Self> {
        let RawInstr {
            label,
            dest,
            op,
            ty,
            args,
            funcs,
            labels,
            value,
            extra,
        } = raw;

        if let Some(name) = label {
            if op.is_some() || dest.is_some() || ty.is_some() {
                return Err(Error::instruction_shape(format!(
                    "label `{}` also carries operation fields",
                    name
                )));
            }
            return Ok(Instruction::Label(Label { name, extra }));
        }

        let op = op.ok_or_else(|| {
            Error::instruction_shape("instruction has neither `label` nor `op`")
        })?;

        match dest {
            Some(dest) => {
                let ty = ty.ok_or_else(|| {
                    Error::instruction_shape(format!("`{}` writes `{}` without a type", op, dest))
                })?;
                Ok(Instruction::Value(ValueOp {
                    op,
                    dest,
                    ty,
                    args,
                    funcs,
                    labels,
                    value,
                    extra,
                }))
            }
            None => {
                if ty.is_some() || value.is_some() {
                    return Err(Error::instruction_shape(format!(
                        "`{}` has a type or literal but no destination",
                        op
                    )));
                }
                Ok(Instruction::Effect(EffectOp {
                    op,
                    args,
                    funcs,
                    labels,
                    extra,
                }))
            }
        }
    }
}

impl From<Instruction> for RawInstr {
    fn from(instr: Instruction) -> Self {
        match instr {
            Instruction::Label(l) => RawInstr {
                label: Some(l.name),
                extra: l.extra,
                ..RawInstr::default()
            },
            Instruction::Value(v) => RawInstr {
                dest: Some(v.dest),
                op: Some(v.op),
                ty: Some(v.ty),
                args: v.args,
                funcs: v.funcs,
                labels: v.labels,
                value: v.value,
                extra: v.extra,
                ..RawInstr::default()
            },
            Instruction::Effect(e) => RawInstr {
                op: Some(e.op),
                args: e.args,
                funcs: e.funcs,
                labels: e.labels,
                extra: e.extra,
                ..RawInstr::default()
            },
        }
    }
}

fn write_operands(
    f: &mut fmt::Formatter<'_>,
    funcs: &[String],
    args: &[String],
    labels: &[String],
) -> fmt::Result {
    for func in funcs {
        write!(f, " @{}", func)?;
    }
    for arg in args {
        write!(f, " {}", arg)?;
    }
    for label in labels {
        write!(f, " .{}", label)?;
    }
    Ok(())
}

/// Textual form, e.g. `not_c: bool = not c;` or `guard c .end_speculation;`
impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Label(l) => write!(f, ".{}:", l.name),
            Instruction::Value(v) => {
                write!(f, "{}: {} = {}", v.dest, v.ty, v.op)?;
                if let Some(ref lit) = v.value {
                    write!(f, " {}", lit)?;
                }
                write_operands(f, &v.funcs, &v.args, &v.labels)?;
                write!(f, ";")
            }
            Instruction::Effect(e) => {
                write!(f, "{}", e.op)?;
                write_operands(f, &e.funcs, &e.args, &e.labels)?;
                write!(f, ";")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Program
// ---------------------------------------------------------------------------

/// A formal parameter of a function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
}

/// A named function with a flat instruction list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Argument>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<Type>,
    #[serde(default)]
    pub instrs: Vec<Instruction>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Function {
    /// Whether any label in the body uses one of the given names
    pub fn defines_label(&self, names: &[&str]) -> Option<&str> {
        self.instrs
            .iter()
            .filter_map(Instruction::label_name)
            .find(|name| names.contains(name))
    }
}

/// A whole program as produced by the external frontend
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Program {
    pub functions: Vec<Function>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Program {
    /// Parse a program from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Pretty-printed JSON with a trailing newline
    pub fn to_json_pretty(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    /// Look up a function by name
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Look up a function by name for modification
    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_variants() {
        let label = Instruction::from_json(r#"{"label": "loop"}"#).unwrap();
        assert_eq!(label, Instruction::label("loop"));
        assert!(label.is_label());
        assert_eq!(label.op(), None);

        let value =
            Instruction::from_json(r#"{"dest": "v", "op": "const", "type": "int", "value": 1}"#)
                .unwrap();
        match value {
            Instruction::Value(ref v) => {
                assert_eq!(v.dest, "v");
                assert_eq!(v.ty, Type::Named("int".into()));
                assert_eq!(v.value, Some(serde_json::json!(1)));
            }
            _ => panic!("expected value op"),
        }

        let effect =
            Instruction::from_json(r#"{"op": "br", "args": ["c"], "labels": ["a", "b"]}"#).unwrap();
        assert!(effect.is_op("br"));
        assert_eq!(effect.args(), ["c".to_string()]);
        assert_eq!(effect.labels(), ["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_shape_errors() {
        assert!(matches!(
            Instruction::from_json(r#"{"label": "x", "op": "jmp"}"#),
            Err(Error::JsonError { .. })
        ));
        assert!(Instruction::from_json(r#"{"args": ["a"]}"#).is_err());
        assert!(Instruction::from_json(r#"{"dest": "v", "op": "add"}"#).is_err());
        assert!(Instruction::from_json(r#"{"op": "print", "type": "int"}"#).is_err());
    }

    #[test]
    fn test_serialization_order_is_stable() {
        let not = Instruction::not("not_c", "c");
        assert_eq!(
            not.to_json().unwrap(),
            r#"{"dest":"not_c","op":"not","type":"bool","args":["c"]}"#
        );
        let guard = Instruction::guard("c", END_SPECULATION);
        assert_eq!(
            guard.to_json().unwrap(),
            r#"{"op":"guard","args":["c"],"labels":["end_speculation"]}"#
        );
        assert_eq!(Instruction::speculate().to_json().unwrap(), r#"{"op":"speculate"}"#);
    }

    #[test]
    fn test_unknown_fields_survive() {
        let text = r#"{"op":"print","args":["x"],"pos":{"col":3,"row":9}}"#;
        let instr = Instruction::from_json(text).unwrap();
        assert_eq!(instr.to_json().unwrap(), text);
    }

    #[test]
    fn test_parameterized_type() {
        let instr = Instruction::from_json(
            r#"{"dest":"p","op":"alloc","type":{"ptr":"int"},"args":["n"]}"#,
        )
        .unwrap();
        assert_eq!(instr.to_string(), "p: ptr<int> = alloc n;");
    }

    #[test]
    fn test_boundary_ops() {
        assert!(Instruction::effect("print", vec!["x".into()], vec![]).is_speculation_boundary());
        assert!(Instruction::effect("ret", vec![], vec![]).is_speculation_boundary());
        let call = Instruction::value("call", "r", Type::Named("int".into()), vec![]);
        assert!(call.is_speculation_boundary());
        assert!(!Instruction::jmp("x").is_speculation_boundary());
        assert!(!Instruction::label("print").is_speculation_boundary());
    }

    #[test]
    fn test_display() {
        assert_eq!(Instruction::label("L1").to_string(), ".L1:");
        assert_eq!(
            Instruction::guard("c", "end_speculation").to_string(),
            "guard c .end_speculation;"
        );
        let call = Instruction::from_json(r#"{"op":"call","funcs":["f"],"args":["a"]}"#).unwrap();
        assert_eq!(call.to_string(), "call @f a;");
    }

    #[test]
    fn test_program_lookup() {
        let program = Program::from_json(
            r#"{"functions":[{"name":"helper","instrs":[]},{"name":"main","instrs":[{"label":"success"}]}]}"#,
        )
        .unwrap();
        assert!(program.function("main").is_some());
        assert!(program.function("nope").is_none());
        let main = program.function("main").unwrap();
        assert_eq!(main.defines_label(RESERVED_LABELS), Some(SUCCESS));
        assert_eq!(program.function("helper").unwrap().defines_label(RESERVED_LABELS), None);
    }
}
