//! tracesplice CLI
//!
//! A command-line interface for the trace splicing pipeline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracesplice::pipeline::{self, PipelineConfig};
use tracesplice::{splice, trace, GuardSynthesizer, VERSION};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tracesplice")]
#[command(
    author,
    version,
    about = "Splice guarded execution traces into IR programs",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file (command-line flags take precedence)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite recorded traces into guarded traces
    Process {
        /// Directory of raw traces
        #[arg(long)]
        traces: Option<PathBuf>,
        /// Output directory (default: rewrite in place)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Worker threads (0 = available parallelism)
        #[arg(short, long)]
        jobs: Option<usize>,
    },

    /// Merge every benchmark with its trace
    Merge {
        /// Directory of benchmark programs
        #[arg(long)]
        benchmarks: Option<PathBuf>,
        /// Directory of raw traces
        #[arg(long)]
        traces: Option<PathBuf>,
        /// Directory of processed traces, preferred over raw ones
        #[arg(long)]
        processed: Option<PathBuf>,
        /// Output directory for `<name>_merged.json`
        #[arg(long)]
        out: Option<PathBuf>,
        /// Text-to-JSON converter command line
        #[arg(long)]
        frontend: Option<String>,
        /// Extension of benchmark programs
        #[arg(long)]
        extension: Option<String>,
        /// Worker threads (0 = available parallelism)
        #[arg(short, long)]
        jobs: Option<usize>,
    },

    /// Merge a single program with a single trace
    Splice {
        /// Program file (JSON IR, or text for the frontend)
        #[arg(long)]
        program: PathBuf,
        /// Raw or processed trace file
        #[arg(long)]
        trace: PathBuf,
        /// Output file (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Text-to-JSON converter command line
        #[arg(long)]
        frontend: Option<String>,
    },

    /// Show the guarded trace synthesized from a raw trace
    ShowTrace {
        /// The trace file
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    setup_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Process { traces, out, jobs } => {
            if let Some(dir) = traces {
                config.traces_dir = dir;
            }
            if out.is_some() {
                config.processed_dir = out;
            }
            if let Some(n) = jobs {
                config.jobs = n;
            }
            let report = pipeline::process_traces(&config).context("processing traces")?;
            print!("{}", report);
        }
        Commands::Merge {
            benchmarks,
            traces,
            processed,
            out,
            frontend,
            extension,
            jobs,
        } => {
            if let Some(dir) = benchmarks {
                config.benchmarks_dir = dir;
            }
            if let Some(dir) = traces {
                config.traces_dir = dir;
            }
            if processed.is_some() {
                config.processed_dir = processed;
            }
            if let Some(dir) = out {
                config.output_dir = dir;
            }
            if let Some(cmd) = frontend {
                config.frontend_command = cmd;
            }
            if let Some(ext) = extension {
                config.program_extension = ext;
            }
            if let Some(n) = jobs {
                config.jobs = n;
            }
            let report = pipeline::run_batch(&config).context("merging benchmarks")?;
            print!("{}", report);
        }
        Commands::Splice {
            program,
            trace,
            out,
            frontend,
        } => {
            if let Some(cmd) = frontend {
                config.frontend_command = cmd;
            }
            let source = config.program_source()?;
            let spliced = pipeline::splice_files(&source, &program, &trace, &config.guard)
                .with_context(|| {
                    format!("splicing {} into {}", trace.display(), program.display())
                })?;
            match out {
                Some(path) => splice::write_program(&path, &spliced.program)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => print!("{}", spliced.program.to_json_pretty()?),
            }
        }
        Commands::ShowTrace { file } => {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let synthesis = GuardSynthesizer::with_config(config.guard.clone())
                .synthesize(&trace::parse_str(&text));
            println!("tracesplice {} - {}", VERSION, file.display());
            print!("{}", pipeline::describe_trace(&synthesis.trace.to_lines()));
            println!("{}", synthesis.stats);
        }
    }
    Ok(())
}
