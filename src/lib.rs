//! tracesplice: trace-based speculative fast paths for a JSON IR
//!
//! Takes a dynamic execution trace of a program, turns its control flow into
//! runtime guards, brackets the result with `speculate`/`commit`, and splices
//! it in front of the original `main` so that the merged program either runs
//! the fast path to completion or falls back to the unmodified code.
//!
//! # Quick Start
//!
//! ```no_run
//! use tracesplice::{guard, ir::Program, splice, trace};
//!
//! fn main() -> tracesplice::Result<()> {
//!     let lines = trace::read_trace_file("traces/fib.trc")?;
//!     let guarded = guard::synthesize(&lines).trace;
//!     let program = Program::from_json(&std::fs::read_to_string("fib.json")?)?;
//!     let merged = splice::splice(&program, &guarded, "fib")?;
//!     splice::write_program("fib_merged.json", &merged.program)?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! The pipeline flows: [`trace`] → [`guard`] → [`deopt`] → [`splice`], with
//! [`ir`] shared by all of them.
//!
//! | Category | Modules |
//! |----------|---------|
//! | **Core** | [`ir`], [`trace`], [`guard`], [`deopt`], [`splice`], [`error`](Error) |
//! | **Batch** | [`frontend`], [`pipeline`] |

pub mod deopt;
pub mod frontend;
pub mod guard;
pub mod ir;
pub mod pipeline;
pub mod splice;
pub mod trace;

mod error;

pub use error::{Error, RecordLocation, Result};
pub use guard::{GuardConfig, GuardSynthesizer, GuardedTrace};
pub use ir::{Instruction, Program};
pub use pipeline::{BatchReport, PipelineConfig};

/// tracesplice version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
