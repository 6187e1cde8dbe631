//! Program loading
//!
//! Programs arrive either as JSON IR or as source text that an external
//! converter (by default `bril2json`) turns into JSON IR. The converter is run
//! synchronously with the source file on stdin; a spawn failure or non-zero
//! exit is reported for that file only.

use crate::error::{Error, Result};
use crate::ir::Program;
use std::fs::{self, File};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// Default text-to-JSON converter
pub const DEFAULT_FRONTEND: &str = "bril2json";

/// Something that can produce a [`Program`] from a file
pub trait ProgramSource: Send + Sync {
    fn load(&self, path: &Path) -> Result<Program>;
}

/// Reads JSON IR directly
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSource;

impl ProgramSource for JsonSource {
    fn load(&self, path: &Path) -> Result<Program> {
        let text = fs::read_to_string(path)?;
        Program::from_json(&text)
    }
}

/// Pipes source text through an external converter
#[derive(Debug, Clone)]
pub struct CommandFrontend {
    program: String,
    args: Vec<String>,
}

impl CommandFrontend {
    /// Build from a command line such as `bril2json` or `python3 tojson.py`
    pub fn from_command_line(command_line: &str) -> Result<Self> {
        let mut words = command_line.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| Error::ConfigError("frontend command is empty".to_string()))?;
        Ok(Self {
            program,
            args: words.collect(),
        })
    }

    /// The command line this frontend runs
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Run the converter and return its stdout
    pub fn convert(&self, path: &Path) -> Result<String> {
        let input = File::open(path)?;
        debug!(command = %self.command_line(), input = %path.display(), "running frontend");

        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::from(input))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| Error::frontend(self.command_line(), path, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = match stderr.trim() {
                "" => format!("exited with {}", output.status),
                text => text.to_string(),
            };
            return Err(Error::frontend(self.command_line(), path, message));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| Error::frontend(self.command_line(), path, e.to_string()))
    }
}

impl ProgramSource for CommandFrontend {
    fn load(&self, path: &Path) -> Result<Program> {
        Program::from_json(&self.convert(path)?)
    }
}

/// Chooses [`JsonSource`] for `.json` files and the converter otherwise
#[derive(Debug, Clone)]
pub struct SourceSelector {
    json: JsonSource,
    text: CommandFrontend,
}

impl SourceSelector {
    pub fn new(text: CommandFrontend) -> Self {
        Self {
            json: JsonSource,
            text,
        }
    }
}

impl ProgramSource for SourceSelector {
    fn load(&self, path: &Path) -> Result<Program> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => self.json.load(path),
            _ => self.text.load(path),
        }
    }
}
