//! Batch driver
//!
//! Runs the trace → guard → splice pipeline over a directory of benchmarks.
//! Every benchmark is independent: failures are recorded in the
//! [`BatchReport`] and the batch carries on with the next item.
//!
//! # Example
//!
//! ```no_run
//! use tracesplice::pipeline::{run_batch, PipelineConfig};
//!
//! let config = PipelineConfig::default();
//! let report = run_batch(&config).unwrap();
//! println!("{}", report);
//! ```

use crate::error::{Error, Result};
use crate::frontend::{CommandFrontend, ProgramSource, SourceSelector, DEFAULT_FRONTEND};
use crate::guard::{GuardConfig, GuardSynthesizer, GuardedTrace, Synthesis};
use crate::splice::{splice, write_program, Spliced};
use crate::trace::{parse_str, read_trace_file, write_trace_file, TraceLine};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

/// Where inputs live, where outputs go, and how to convert programs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory of benchmark programs
    pub benchmarks_dir: PathBuf,
    /// Directory of recorded traces, one `<benchmark>.<trace_extension>` each
    pub traces_dir: PathBuf,
    /// Where processed traces are written; `None` rewrites them in place
    pub processed_dir: Option<PathBuf>,
    /// Where `<benchmark>_merged.json` files are written
    pub output_dir: PathBuf,
    /// Extension of benchmark programs
    pub program_extension: String,
    /// Extension of trace files
    pub trace_extension: String,
    /// Command line of the text-to-JSON converter
    pub frontend_command: String,
    /// Worker threads; 0 picks the available parallelism
    pub jobs: usize,
    pub guard: GuardConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            benchmarks_dir: PathBuf::from("benchmarks"),
            traces_dir: PathBuf::from("traces"),
            processed_dir: None,
            output_dir: PathBuf::from("merged"),
            program_extension: "bril".to_string(),
            trace_extension: "trc".to_string(),
            frontend_command: DEFAULT_FRONTEND.to_string(),
            jobs: 0,
            guard: GuardConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Number of worker threads to use
    pub fn worker_count(&self) -> usize {
        match self.jobs {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        }
    }

    /// Program loader for this configuration
    pub fn program_source(&self) -> Result<SourceSelector> {
        Ok(SourceSelector::new(CommandFrontend::from_command_line(
            &self.frontend_command,
        )?))
    }

    /// Recorded trace for a benchmark
    pub fn trace_path(&self, name: &str) -> PathBuf {
        self.traces_dir.join(format!("{}.{}", name, self.trace_extension))
    }

    /// Trace the merge step reads: the processed one if it exists
    pub fn merge_trace_path(&self, name: &str) -> PathBuf {
        if let Some(ref dir) = self.processed_dir {
            let processed = dir.join(format!("{}.{}", name, self.trace_extension));
            if processed.is_file() {
                return processed;
            }
        }
        self.trace_path(name)
    }

    /// Merged program for a benchmark
    pub fn merged_path(&self, name: &str) -> PathBuf {
        self.output_dir.join(format!("{}_merged.json", name))
    }
}

// ---------------------------------------------------------------------------
// BatchReport
// ---------------------------------------------------------------------------

/// Outcome of one item in a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BenchmarkStatus {
    /// A guarded trace was written
    Processed {
        guards: usize,
        truncated_at: Option<String>,
    },
    /// A merged program was written
    Merged {
        trace_instrs: usize,
        guards: usize,
        anchor: usize,
    },
    /// Nothing to do for this item
    Skipped { reason: String },
    /// The item could not be completed
    Failed { error: String },
}

impl BenchmarkStatus {
    fn failed(error: &Error) -> Self {
        BenchmarkStatus::Failed {
            error: error.to_string(),
        }
    }
}

impl fmt::Display for BenchmarkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BenchmarkStatus::Processed { guards, truncated_at } => {
                write!(f, "OK       {} guards", guards)?;
                if let Some(op) = truncated_at {
                    write!(f, ", cut at `{}`", op)?;
                }
                Ok(())
            }
            BenchmarkStatus::Merged {
                trace_instrs,
                guards,
                anchor,
            } => write!(
                f,
                "OK       {} trace instrs, {} guards, resume at {}",
                trace_instrs, guards, anchor
            ),
            BenchmarkStatus::Skipped { reason } => write!(f, "SKIP     {}", reason),
            BenchmarkStatus::Failed { error } => write!(f, "ERROR    {}", error),
        }
    }
}

/// One named item and its outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkOutcome {
    pub name: String,
    pub status: BenchmarkStatus,
}

/// Per-item results of a batch plus a summary
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub title: String,
    /// Items in discovery (name) order
    pub outcomes: Vec<BenchmarkOutcome>,
    pub duration: Duration,
}

impl BatchReport {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            outcomes: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// Items that produced an artifact
    pub fn succeeded(&self) -> usize {
        self.count(|s| {
            matches!(
                s,
                BenchmarkStatus::Processed { .. } | BenchmarkStatus::Merged { .. }
            )
        })
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, BenchmarkStatus::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, BenchmarkStatus::Failed { .. }))
    }

    /// Outcome for a named item
    pub fn get(&self, name: &str) -> Option<&BenchmarkStatus> {
        self.outcomes
            .iter()
            .find(|o| o.name == name)
            .map(|o| &o.status)
    }

    fn count(&self, pred: impl Fn(&BenchmarkStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(f, "  {}", self.title)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for outcome in &self.outcomes {
            writeln!(f, "  {:<30} {}", outcome.name, outcome.status)?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "  Total: {}  OK: {}  Skipped: {}  Failed: {}",
            self.total(),
            self.succeeded(),
            self.skipped(),
            self.failed()
        )?;
        writeln!(f, "  Duration: {:?}", self.duration)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Single-item steps
// ---------------------------------------------------------------------------

/// Synthesize a guarded trace from raw trace text
pub fn process_trace_text(text: &str, guard: &GuardConfig) -> Synthesis {
    GuardSynthesizer::with_config(guard.clone()).synthesize(&parse_str(text))
}

/// Load a trace for splicing: processed traces are read back as-is, raw
/// traces are synthesized on the fly
pub fn load_guarded_trace(path: &Path, guard: &GuardConfig) -> Result<GuardedTrace> {
    let lines = read_trace_file(path)?;
    if GuardedTrace::is_processed(&lines) {
        GuardedTrace::from_processed(&lines).map_err(|e| e.with_file(path))
    } else {
        Ok(GuardSynthesizer::with_config(guard.clone())
            .synthesize(&lines)
            .trace)
    }
}

/// Splice one (program, trace) pair without writing anything
pub fn splice_files(
    source: &dyn ProgramSource,
    program_path: &Path,
    trace_path: &Path,
    guard: &GuardConfig,
) -> Result<Spliced> {
    let trace = load_guarded_trace(trace_path, guard)?;
    let program = source.load(program_path)?;
    splice(&program, &trace, &benchmark_name(program_path))
}

/// Process one raw trace file into `dest`
pub fn process_trace_file(
    path: &Path,
    dest: &Path,
    guard: &GuardConfig,
) -> Result<BenchmarkStatus> {
    let lines = read_trace_file(path)?;
    if GuardedTrace::is_processed(&lines) {
        return Ok(BenchmarkStatus::Skipped {
            reason: "already processed".to_string(),
        });
    }

    let Synthesis { trace, stats } =
        GuardSynthesizer::with_config(guard.clone()).synthesize(&lines);
    write_trace_file(dest, &trace.to_lines())?;
    info!(trace = %path.display(), %stats, "processed trace");
    Ok(BenchmarkStatus::Processed {
        guards: stats.guards,
        truncated_at: stats.truncated_at,
    })
}

/// Merge one benchmark and write `<name>_merged.json`
pub fn merge_benchmark(
    config: &PipelineConfig,
    source: &dyn ProgramSource,
    program_path: &Path,
) -> BenchmarkOutcome {
    let name = benchmark_name(program_path);
    let status = match try_merge(config, source, program_path, &name) {
        Ok(status) => status,
        Err(e) => {
            warn!(benchmark = %name, error = %e, "merge failed");
            BenchmarkStatus::failed(&e)
        }
    };
    BenchmarkOutcome { name, status }
}

fn try_merge(
    config: &PipelineConfig,
    source: &dyn ProgramSource,
    program_path: &Path,
    name: &str,
) -> Result<BenchmarkStatus> {
    let trace_path = config.merge_trace_path(name);
    if !trace_path.is_file() {
        info!(benchmark = name, "no trace file, skipping");
        return Ok(BenchmarkStatus::Skipped {
            reason: format!("no trace file {}", trace_path.display()),
        });
    }

    let trace = load_guarded_trace(&trace_path, &config.guard)?;
    let program = source.load(program_path)?;
    let spliced = splice(&program, &trace, name)?;

    fs::create_dir_all(&config.output_dir)?;
    write_program(config.merged_path(name), &spliced.program)?;

    let guards = trace.instructions().filter(|i| i.is_op("guard")).count();
    info!(
        benchmark = name,
        trace_instrs = spliced.trace_instrs,
        guards,
        anchor = spliced.anchor.index,
        "merged"
    );
    Ok(BenchmarkStatus::Merged {
        trace_instrs: spliced.trace_instrs,
        guards,
        anchor: spliced.anchor.index,
    })
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

/// Process every trace in `traces_dir`
pub fn process_traces(config: &PipelineConfig) -> Result<BatchReport> {
    let start = Instant::now();
    let traces = list_files(&config.traces_dir, &config.trace_extension)?;
    if let Some(ref dir) = config.processed_dir {
        fs::create_dir_all(dir)?;
    }

    let outcomes = fan_out(&traces, config.worker_count(), |path| {
        let name = benchmark_name(path);
        let dest = match (&config.processed_dir, path.file_name()) {
            (Some(dir), Some(file)) => dir.join(file),
            _ => path.to_path_buf(),
        };
        let status = process_trace_file(path, &dest, &config.guard).unwrap_or_else(|e| {
            warn!(trace = %path.display(), error = %e, "processing failed");
            BenchmarkStatus::failed(&e)
        });
        BenchmarkOutcome { name, status }
    });

    let mut report = BatchReport::new("Trace Processing");
    report.outcomes = outcomes;
    report.duration = start.elapsed();
    Ok(report)
}

/// Merge every benchmark in `benchmarks_dir` with its trace
pub fn run_batch(config: &PipelineConfig) -> Result<BatchReport> {
    let source = config.program_source()?;
    run_batch_with(config, &source)
}

/// [`run_batch`] with a caller-provided program loader
pub fn run_batch_with(config: &PipelineConfig, source: &dyn ProgramSource) -> Result<BatchReport> {
    let start = Instant::now();
    let programs = list_files(&config.benchmarks_dir, &config.program_extension)?;
    info!(
        benchmarks = programs.len(),
        workers = config.worker_count(),
        "starting merge batch"
    );

    let outcomes = fan_out(&programs, config.worker_count(), |path| {
        merge_benchmark(config, source, path)
    });

    let mut report = BatchReport::new("Merge Report");
    report.outcomes = outcomes;
    report.duration = start.elapsed();
    Ok(report)
}

/// Files in `dir` with the given extension, sorted by path
pub fn list_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        Error::ConfigError(format!(
            "Failed to read directory '{}': {}",
            dir.display(),
            e
        ))
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(extension) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// File stem used as the benchmark name
pub fn benchmark_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Run `work` over `items` on up to `workers` scoped threads, keeping order
fn fan_out<F>(items: &[PathBuf], workers: usize, work: F) -> Vec<BenchmarkOutcome>
where
    F: Fn(&Path) -> BenchmarkOutcome + Sync,
{
    if items.is_empty() {
        return Vec::new();
    }
    let workers = workers.clamp(1, items.len());
    if workers == 1 {
        return items.iter().map(|p| work(p.as_path())).collect();
    }

    let chunk_size = items.len().div_ceil(workers);
    let work = &work;
    std::thread::scope(|scope| {
        let handles: Vec<_> = items
            .chunks(chunk_size)
            .map(|chunk| {
                let handle = scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|p| work(p.as_path()))
                        .collect::<Vec<_>>()
                });
                (chunk, handle)
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|(chunk, handle)| {
                handle.join().unwrap_or_else(|_| {
                    chunk
                        .iter()
                        .map(|p| BenchmarkOutcome {
                            name: benchmark_name(p),
                            status: BenchmarkStatus::Failed {
                                error: "worker panicked".to_string(),
                            },
                        })
                        .collect()
                })
            })
            .collect()
    })
}

/// Render a guarded trace for display
pub fn describe_trace(lines: &[TraceLine]) -> String {
    let mut out = String::new();
    for line in lines {
        match line.instruction() {
            Some(instr) => out.push_str(&format!("  {}\n", instr)),
            None => out.push_str(&format!("  # {}\n", line)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::JsonSource;
    use pretty_assertions::assert_eq;

    fn config_in(root: &Path) -> PipelineConfig {
        PipelineConfig {
            benchmarks_dir: root.join("benchmarks"),
            traces_dir: root.join("traces"),
            output_dir: root.join("merged"),
            program_extension: "json".to_string(),
            jobs: 2,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_config_defaults_and_partial_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        fs::write(&path, r#"{"jobs": 3, "guard": {"accept_bare_labels": false}}"#).unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.jobs, 3);
        assert_eq!(config.worker_count(), 3);
        assert!(!config.guard.accept_bare_labels);
        assert_eq!(config.trace_extension, "trc");
        assert_eq!(config.merged_path("fib"), PathBuf::from("merged/fib_merged.json"));

        assert!(matches!(
            PipelineConfig::load(dir.path().join("missing.json")),
            Err(Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_merge_trace_path_prefers_processed() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        assert_eq!(config.merge_trace_path("a"), dir.path().join("traces/a.trc"));

        let processed = dir.path().join("processed");
        fs::create_dir_all(&processed).unwrap();
        fs::write(processed.join("a.trc"), "{\"op\":\"speculate\"}\n").unwrap();
        config.processed_dir = Some(processed.clone());
        assert_eq!(config.merge_trace_path("a"), processed.join("a.trc"));
        assert_eq!(config.merge_trace_path("b"), dir.path().join("traces/b.trc"));
    }

    #[test]
    fn test_process_trace_text() {
        let synthesis = process_trace_text(
            "{\"op\":\"br\",\"args\":[\"c\"],\"labels\":[\"a\",\"b\"]}\ntrace: b\n",
            &GuardConfig::default(),
        );
        assert_eq!(synthesis.stats.guards, 1);
        assert_eq!(synthesis.stats.negations, 1);
    }

    #[test]
    fn test_fan_out_keeps_order() {
        let items: Vec<PathBuf> = (0..7).map(|i| PathBuf::from(format!("b{}.json", i))).collect();
        let outcomes = fan_out(&items, 3, |p| BenchmarkOutcome {
            name: benchmark_name(p),
            status: BenchmarkStatus::Skipped { reason: String::new() },
        });
        let names: Vec<_> = outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["b0", "b1", "b2", "b3", "b4", "b5", "b6"]);
        assert!(fan_out(&[], 4, |_| unreachable!()).is_empty());
    }

    #[test]
    fn test_missing_trace_is_skipped_without_loading_program() {
        struct Unreachable;
        impl ProgramSource for Unreachable {
            fn load(&self, path: &Path) -> Result<crate::ir::Program> {
                panic!("program {} should not be loaded", path.display())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let program = dir.path().join("benchmarks/fib.json");
        let outcome = merge_benchmark(&config, &Unreachable, &program);
        assert_eq!(outcome.name, "fib");
        assert!(matches!(outcome.status, BenchmarkStatus::Skipped { .. }));
    }

    #[test]
    fn test_missing_benchmark_dir_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        assert!(matches!(run_batch_with(&config, &JsonSource), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_report_counts_and_display() {
        let mut report = BatchReport::new("Merge Report");
        report.outcomes = vec![
            BenchmarkOutcome {
                name: "a".into(),
                status: BenchmarkStatus::Merged {
                    trace_instrs: 4,
                    guards: 1,
                    anchor: 2,
                },
            },
            BenchmarkOutcome {
                name: "b".into(),
                status: BenchmarkStatus::Skipped { reason: "no trace".into() },
            },
            BenchmarkOutcome {
                name: "c".into(),
                status: BenchmarkStatus::Failed { error: "boom".into() },
            },
        ];
        assert_eq!(
            (report.total(), report.succeeded(), report.skipped(), report.failed()),
            (3, 1, 1, 1)
        );
        assert_eq!(report.get("c"), Some(&BenchmarkStatus::Failed { error: "boom".into() }));
        let text = report.to_string();
        assert!(text.contains("Total: 3  OK: 1  Skipped: 1  Failed: 1"));
        assert!(text.contains("OK       4 trace instrs, 1 guards, resume at 2"));
    }

    #[test]
    fn test_describe_trace() {
        let lines = parse_str("{\"op\":\"speculate\"}\nnote\n");
        assert_eq!(describe_trace(&lines), "  speculate;\n  # note\n");
    }
}
