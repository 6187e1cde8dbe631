//! Error types for the trace splicing pipeline

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Position of a record inside a trace or program file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordLocation {
    /// File the record came from (if known)
    pub file: Option<PathBuf>,
    /// Record number (1-indexed, blank lines excluded)
    pub record: usize,
}

impl RecordLocation {
    /// Create a location for the given record number
    pub fn new(record: usize) -> Self {
        Self { file: None, record }
    }

    /// Attach a file name
    pub fn with_file(mut self, file: impl AsRef<Path>) -> Self {
        self.file = Some(file.as_ref().to_path_buf());
        self
    }
}

impl fmt::Display for RecordLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.file {
            Some(ref file) => write!(f, "{}:{}", file.display(), self.record),
            None => write!(f, "record {}", self.record),
        }
    }
}

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// A JSON object that does not describe exactly one instruction variant
    #[error("InstructionShapeError: {message}")]
    InstructionShape { message: String },

    /// A processed trace that lacks the speculate/commit bracket
    #[error("TraceShapeError: {message} at {location}")]
    TraceShape {
        message: String,
        location: RecordLocation,
    },

    /// The program has no function named `main`
    #[error("MissingMainError: no `main` function in {program}")]
    MissingMain { program: String },

    /// The `main` function has no instructions to splice into
    #[error("EmptyMainError: `main` has no instructions in {program}")]
    EmptyMain { program: String },

    /// The external text-to-JSON frontend failed
    #[error("FrontendError: `{command}` failed on {input}: {message}")]
    Frontend {
        command: String,
        input: PathBuf,
        message: String,
    },

    /// Invalid pipeline configuration
    #[error("ConfigError: {0}")]
    ConfigError(String),

    /// Malformed JSON in a program or config file
    #[error("JsonError: {source}")]
    JsonError {
        #[from]
        source: serde_json::Error,
    },

    /// IO error
    #[error("IOError: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    /// Create an instruction shape error
    pub fn instruction_shape(message: impl Into<String>) -> Self {
        Error::InstructionShape {
            message: message.into(),
        }
    }

    /// Create a trace shape error
    pub fn trace_shape(message: impl Into<String>, location: RecordLocation) -> Self {
        Error::TraceShape {
            message: message.into(),
            location,
        }
    }

    /// Create a missing-main error for the named program
    pub fn missing_main(program: impl Into<String>) -> Self {
        Error::MissingMain {
            program: program.into(),
        }
    }

    /// Create an empty-main error for the named program
    pub fn empty_main(program: impl Into<String>) -> Self {
        Error::EmptyMain {
            program: program.into(),
        }
    }

    /// Create a frontend error
    pub fn frontend(
        command: impl Into<String>,
        input: impl AsRef<Path>,
        message: impl Into<String>,
    ) -> Self {
        Error::Frontend {
            command: command.into(),
            input: input.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Attach a file to a trace shape error
    pub fn with_file(self, file: impl AsRef<Path>) -> Self {
        match self {
            Error::TraceShape { message, location } => Error::TraceShape {
                message,
                location: location.with_file(file),
            },
            other => other,
        }
    }
}

/// Result type alias for the pipeline
pub type Result<T> = std::result::Result<T, Error>;
