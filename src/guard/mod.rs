//! Guard synthesis
//!
//! Rewrites a recorded trace into a straight-line speculative region:
//!
//! ```text
//! speculate
//! <trace body with every `br` replaced by a `guard`>
//! commit
//! jmp .success
//! <last observed source line>
//! ```
//!
//! The pass is a single forward walk over the parsed records. A `br` reads
//! exactly one record ahead to find which target was taken, and consumes both
//! records when it turns into a guard. The walk stops at the first `call`,
//! `ret` or `print`, since those cannot be rolled back if a later guard fails.

use crate::error::{Error, RecordLocation, Result};
use crate::ir::{Instruction, END_SPECULATION, RESERVED_LABELS, SUCCESS};
use crate::trace::TraceLine;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Configuration for guard synthesis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Accept a bare single-word line after a `br` as the taken label, as
    /// written by older recorders that did not emit `trace: <label>`
    pub accept_bare_labels: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            accept_bare_labels: true,
        }
    }
}

// ---------------------------------------------------------------------------
// TraceCursor
// ---------------------------------------------------------------------------

/// Index-based cursor over parsed trace records
#[derive(Debug, Clone)]
pub struct TraceCursor<'a> {
    lines: &'a [TraceLine],
    pos: usize,
}

impl<'a> TraceCursor<'a> {
    pub fn new(lines: &'a [TraceLine]) -> Self {
        Self { lines, pos: 0 }
    }

    /// Record under the cursor
    pub fn current(&self) -> Option<&'a TraceLine> {
        self.lines.get(self.pos)
    }

    /// Record `offset` places past the cursor
    pub fn peek(&self, offset: usize) -> Option<&'a TraceLine> {
        self.lines.get(self.pos + offset)
    }

    /// Move past `count` records
    pub fn advance(&mut self, count: usize) {
        self.pos = (self.pos + count).min(self.lines.len());
    }

    /// Records from the cursor to the end
    pub fn remaining(&self) -> &'a [TraceLine] {
        &self.lines[self.pos..]
    }

    /// Index of the record under the cursor
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_done(&self) -> bool {
        self.pos >= self.lines.len()
    }
}

// ---------------------------------------------------------------------------
// GuardedTrace
// ---------------------------------------------------------------------------

/// A speculative region ready to be spliced into a program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardedTrace {
    /// `speculate` through `jmp .success`, including passthrough records
    body: Vec<TraceLine>,
    /// Last source line the trace proves was reached
    resume_line: Option<u32>,
}

impl GuardedTrace {
    /// Bracket a rewritten body with the speculation markers
    pub fn new(rewritten: Vec<TraceLine>, resume_line: Option<u32>) -> Self {
        let mut body = Vec::with_capacity(rewritten.len() + 3);
        body.push(TraceLine::Bare(Instruction::speculate()));
        body.extend(rewritten);
        body.push(TraceLine::Bare(Instruction::commit()));
        body.push(TraceLine::Bare(Instruction::jmp(SUCCESS)));
        Self { body, resume_line }
    }

    /// Whether parsed records already have the shape of a processed trace
    pub fn is_processed(lines: &[TraceLine]) -> bool {
        lines
            .iter()
            .find_map(TraceLine::instruction)
            .is_some_and(|instr| instr.is_op("speculate"))
    }

    /// Rebuild a guarded trace from a processed trace file
    pub fn from_processed(lines: &[TraceLine]) -> Result<Self> {
        let mut body = Vec::with_capacity(lines.len());
        let mut resume_line = None;
        for line in lines {
            match line {
                TraceLine::ResumeHint(n) => resume_line = Some(*n),
                TraceLine::Taken(_) => {}
                other => body.push(other.clone()),
            }
        }

        // record number (1-indexed) of every instruction
        let instrs: Vec<(usize, &Instruction)> = lines
            .iter()
            .enumerate()
            .filter_map(|(idx, l)| l.instruction().map(|i| (idx + 1, i)))
            .collect();

        if !instrs.first().is_some_and(|(_, i)| i.is_op("speculate")) {
            return Err(Error::trace_shape(
                "processed trace does not start with `speculate`",
                RecordLocation::new(1),
            ));
        }

        let last = instrs.len() - 1;
        for (pos, &(record, instr)) in instrs.iter().enumerate() {
            if let Some(label) = instr
                .label_name()
                .filter(|name| RESERVED_LABELS.contains(name))
            {
                return Err(Error::trace_shape(
                    format!("processed trace defines reserved label `{}`", label),
                    RecordLocation::new(record),
                ));
            }
            let unconverted = instr.is_op("br")
                || (instr.is_op("jmp") && (pos != last || instr.labels() != [SUCCESS]));
            if unconverted {
                return Err(Error::trace_shape(
                    format!(
                        "unconverted `{}` in processed trace",
                        instr.op().unwrap_or("?")
                    ),
                    RecordLocation::new(record),
                ));
            }
        }

        if !instrs.iter().any(|(_, i)| i.is_op("commit")) {
            return Err(Error::trace_shape(
                "processed trace has no `commit`",
                RecordLocation::new(lines.len()),
            ));
        }
        let committed = matches!(
            instrs.as_slice(),
            [.., (_, commit), (_, jmp)] if commit.is_op("commit") && jmp.is_op("jmp")
        );
        if !committed {
            return Err(Error::trace_shape(
                "processed trace does not end with `commit; jmp .success`",
                RecordLocation::new(instrs[last].0),
            ));
        }

        Ok(Self { body, resume_line })
    }

    /// Instructions of the region in order, markers included
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.body.iter().filter_map(TraceLine::instruction)
    }

    pub fn resume_line(&self) -> Option<u32> {
        self.resume_line
    }

    /// Records of the processed trace file, hint last
    pub fn to_lines(&self) -> Vec<TraceLine> {
        let mut lines = self.body.clone();
        if let Some(n) = self.resume_line {
            lines.push(TraceLine::ResumeHint(n));
        }
        lines
    }
}

// ---------------------------------------------------------------------------
// SynthesisStats
// ---------------------------------------------------------------------------

/// Counters describing one synthesis pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynthesisStats {
    /// Guards emitted, one per `br`
    pub guards: usize,
    /// Guards whose condition needed a `not`
    pub negations: usize,
    /// `jmp` records removed
    pub jumps_dropped: usize,
    /// `br` records without one operand and two targets, removed
    pub malformed_branches: usize,
    /// `br` records with no taken record after them
    pub unresolved_branches: usize,
    /// `br` records whose taken label matched neither target
    pub mismatched_branches: usize,
    /// `trace: <label>` records with no branch before them
    pub stray_taken: usize,
    /// Opaque records copied into the output
    pub passthrough: usize,
    /// Operator that cut the trace short, if any
    pub truncated_at: Option<String>,
}

impl fmt::Display for SynthesisStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "guards: {} (negated {}), jumps dropped: {}",
            self.guards, self.negations, self.jumps_dropped
        )?;
        if self.malformed_branches + self.unresolved_branches + self.mismatched_branches > 0 {
            write!(
                f,
                ", branches malformed/unresolved/mismatched: {}/{}/{}",
                self.malformed_branches, self.unresolved_branches, self.mismatched_branches
            )?;
        }
        if self.passthrough > 0 {
            write!(f, ", passthrough: {}", self.passthrough)?;
        }
        match self.truncated_at {
            Some(ref op) => write!(f, ", truncated at `{}`", op),
            None => write!(f, ", ran to end of trace"),
        }
    }
}

// ---------------------------------------------------------------------------
// GuardSynthesizer
// ---------------------------------------------------------------------------

/// Result of one synthesis pass
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub trace: GuardedTrace,
    pub stats: SynthesisStats,
}

/// Turns parsed trace records into a [`GuardedTrace`]
pub struct GuardSynthesizer {
    config: GuardConfig,
}

impl GuardSynthesizer {
    /// Create a synthesizer with default configuration
    pub fn new() -> Self {
        Self {
            config: GuardConfig::default(),
        }
    }

    /// Create a synthesizer with custom configuration
    pub fn with_config(config: GuardConfig) -> Self {
        Self { config }
    }

    /// Run the pass over a parsed trace
    pub fn synthesize(&self, lines: &[TraceLine]) -> Synthesis {
        let mut cursor = TraceCursor::new(lines);
        let mut stats = SynthesisStats::default();
        let mut rewritten = Vec::new();
        let mut last_line = None;
        let mut carried_hint = None;

        while let Some(record) = cursor.current() {
            match record {
                TraceLine::Annotated { instr, .. } | TraceLine::Bare(instr) => {
                    if instr.is_speculation_boundary() {
                        if let Some(line) = record.source_line() {
                            last_line = Some(line);
                        }
                        debug!(
                            op = instr.op(),
                            position = cursor.position(),
                            "speculation boundary"
                        );
                        stats.truncated_at = instr.op().map(str::to_string);
                        // the hint is the terminal record, past the cut
                        if let Some(hint) = trailing_hint(cursor.remaining()) {
                            carried_hint = Some(hint);
                        }
                        break;
                    }

                    if instr.is_op("jmp") {
                        stats.jumps_dropped += 1;
                        cursor.advance(1);
                        continue;
                    }

                    if instr.is_op("br") {
                        let consumed =
                            self.rewrite_branch(instr, &cursor, &mut rewritten, &mut stats);
                        cursor.advance(consumed);
                        continue;
                    }

                    rewritten.push(record.clone());
                    if let Some(line) = record.source_line() {
                        last_line = Some(line);
                    }
                    cursor.advance(1);
                }
                TraceLine::Taken(label) => {
                    debug!(label = label.as_str(), "taken record without a branch");
                    stats.stray_taken += 1;
                    cursor.advance(1);
                }
                TraceLine::ResumeHint(line) => {
                    carried_hint = Some(*line);
                    cursor.advance(1);
                }
                TraceLine::Opaque(_) => {
                    rewritten.push(record.clone());
                    stats.passthrough += 1;
                    cursor.advance(1);
                }
            }
        }

        Synthesis {
            trace: GuardedTrace::new(rewritten, last_line.or(carried_hint)),
            stats,
        }
    }

    /// Replace the `br` under the cursor with a guard; returns how many
    /// records were consumed
    fn rewrite_branch(
        &self,
        branch: &Instruction,
        cursor: &TraceCursor<'_>,
        out: &mut Vec<TraceLine>,
        stats: &mut SynthesisStats,
    ) -> usize {
        let (cond, on_true, on_false) = match (branch.args(), branch.labels()) {
            ([cond], [on_true, on_false]) => (cond, on_true, on_false),
            _ => {
                warn!(branch = %branch, "branch without one operand and two targets dropped");
                stats.malformed_branches += 1;
                return 1;
            }
        };

        let taken = match cursor.peek(1) {
            Some(TraceLine::Taken(label)) => Some(label.as_str()),
            Some(TraceLine::Opaque(text))
                if self.config.accept_bare_labels && is_bare_label(text) =>
            {
                Some(text.as_str())
            }
            _ => None,
        };

        let Some(taken) = taken else {
            warn!(branch = %branch, "no taken record after branch, guarding on the operand as-is");
            stats.unresolved_branches += 1;
            stats.guards += 1;
            out.push(TraceLine::Bare(Instruction::guard(cond.as_str(), END_SPECULATION)));
            return 1;
        };

        let guard_cond = if taken == on_true {
            cond.clone()
        } else if taken == on_false {
            let negated = format!("not_{}", cond);
            out.push(TraceLine::Bare(Instruction::not(negated.as_str(), cond.as_str())));
            stats.negations += 1;
            negated
        } else {
            warn!(
                branch = %branch,
                taken,
                "taken label matches neither target, guarding on the operand as-is"
            );
            stats.mismatched_branches += 1;
            cond.clone()
        };

        out.push(TraceLine::Bare(Instruction::guard(guard_cond, END_SPECULATION)));
        stats.guards += 1;
        2
    }
}

impl Default for GuardSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Last resume hint among `lines`
fn trailing_hint(lines: &[TraceLine]) -> Option<u32> {
    lines.iter().rev().find_map(|line| match line {
        TraceLine::ResumeHint(n) => Some(*n),
        _ => None,
    })
}

/// Legacy recorders wrote the taken label alone on its line
fn is_bare_label(text: &str) -> bool {
    !text.is_empty() && !text.chars().any(char::is_whitespace)
}

/// Synthesize with the default configuration
pub fn synthesize(lines: &[TraceLine]) -> Synthesis {
    GuardSynthesizer::new().synthesize(lines)
}
