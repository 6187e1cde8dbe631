//! Line-oriented trace records
//!
//! A trace is what the reference interpreter writes while running a program
//! once. Each non-blank line is one of:
//!
//! | Form | Record |
//! |------|--------|
//! | `trace (line N): {json}` | instruction executed at source position `N` |
//! | `{json}` | instruction without a position |
//! | `trace: L` | branch target `L` was taken |
//! | `N` | resumption hint left behind by an earlier pipeline run |
//!
//! Anything else is kept verbatim as an opaque record. Processed traces are
//! written back in the same grammar.

use crate::error::Result;
use crate::ir::Instruction;
use regex::Regex;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

static ANNOTATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^trace \(line (\d+)\):\s*(.*)$").expect("annotated record pattern")
});

static TAKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^trace:\s*(\S.*)$").expect("taken record pattern"));

/// One parsed trace record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceLine {
    /// Instruction executed at a known source position
    Annotated { line: u32, instr: Instruction },
    /// Instruction without a source position
    Bare(Instruction),
    /// Branch target actually taken at runtime
    Taken(String),
    /// Last known good source line from an earlier run
    ResumeHint(u32),
    /// A record this parser does not understand, kept as-is
    Opaque(String),
}

impl TraceLine {
    /// Parse a single line; `None` for blank lines
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        if text.bytes().all(|b| b.is_ascii_digit()) {
            return Some(match text.parse() {
                Ok(line) => TraceLine::ResumeHint(line),
                Err(_) => TraceLine::Opaque(text.to_string()),
            });
        }

        if let Some(caps) = ANNOTATED.captures(text) {
            let instr = caps[1]
                .parse::<u32>()
                .ok()
                .zip(Instruction::from_json(&caps[2]).ok());
            return Some(match instr {
                Some((line, instr)) => TraceLine::Annotated { line, instr },
                None => {
                    debug!(record = text, "unparseable annotated record kept opaque");
                    TraceLine::Opaque(text.to_string())
                }
            });
        }

        if let Some(caps) = TAKEN.captures(text) {
            return Some(TraceLine::Taken(caps[1].trim().to_string()));
        }

        if text.starts_with('{') {
            return Some(match Instruction::from_json(text) {
                Ok(instr) => TraceLine::Bare(instr),
                Err(e) => {
                    debug!(record = text, error = %e, "unparseable instruction kept opaque");
                    TraceLine::Opaque(text.to_string())
                }
            });
        }

        Some(TraceLine::Opaque(text.to_string()))
    }

    /// The executed instruction, if this record carries one
    pub fn instruction(&self) -> Option<&Instruction> {
        match self {
            TraceLine::Annotated { instr, .. } | TraceLine::Bare(instr) => Some(instr),
            _ => None,
        }
    }

    /// Source position of an annotated instruction
    pub fn source_line(&self) -> Option<u32> {
        match self {
            TraceLine::Annotated { line, .. } => Some(*line),
            _ => None,
        }
    }
}

impl fmt::Display for TraceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceLine::Annotated { line, instr } => {
                let json = serde_json::to_string(instr).map_err(|_| fmt::Error)?;
                write!(f, "trace (line {}): {}", line, json)
            }
            TraceLine::Bare(instr) => {
                let json = serde_json::to_string(instr).map_err(|_| fmt::Error)?;
                write!(f, "{}", json)
            }
            TraceLine::Taken(label) => write!(f, "trace: {}", label),
            TraceLine::ResumeHint(line) => write!(f, "{}", line),
            TraceLine::Opaque(text) => write!(f, "{}", text),
        }
    }
}

/// Parse a sequence of raw lines, skipping blanks
pub fn parse_lines<I, S>(lines: I) -> Vec<TraceLine>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .filter_map(|line| TraceLine::parse(line.as_ref()))
        .collect()
}

/// Parse a whole trace held in memory
pub fn parse_str(text: &str) -> Vec<TraceLine> {
    parse_lines(text.lines())
}

/// Read and parse a trace file
pub fn read_trace_file(path: impl AsRef<Path>) -> Result<Vec<TraceLine>> {
    let text = fs::read_to_string(path.as_ref())?;
    Ok(parse_str(&text))
}

/// Render records one per line, each terminated by a newline
pub fn render_lines(lines: &[TraceLine]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(&line.to_string());
        out.push('\n');
    }
    out
}

/// Write records to a trace file, replacing any previous contents
pub fn write_trace_file(path: impl AsRef<Path>, lines: &[TraceLine]) -> Result<()> {
    fs::write(path.as_ref(), render_lines(lines))?;
    Ok(())
}
