//! Shared test helpers for integration tests

use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tracesplice::PipelineConfig;

/// `v = const true; br v L1 L2; L1: print v; L2: ret`
pub const BRANCHY_PROGRAM: &str = r#"{
  "functions": [
    {
      "name": "main",
      "instrs": [
        {"dest": "v", "op": "const", "type": "bool", "value": true},
        {"op": "br", "args": ["v"], "labels": ["L1", "L2"]},
        {"label": "L1"},
        {"op": "print", "args": ["v"]},
        {"label": "L2"},
        {"op": "ret"}
      ]
    }
  ]
}"#;

pub const BRANCHY_TRACE: &str = r#"trace (line 0): {"op":"br","args":["v"],"labels":["L1","L2"]}
trace: L1
trace (line 1): {"op":"print","args":["v"]}
"#;

/// A scratch directory laid out as `benchmarks/`, `traces/`, `merged/`
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("benchmarks")).expect("benchmarks dir");
        fs::create_dir_all(dir.path().join("traces")).expect("traces dir");
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Add a JSON benchmark program
    pub fn program(&self, name: &str, json: &str) -> &Self {
        let path = self.root().join("benchmarks").join(format!("{}.json", name));
        fs::write(path, json).expect("write program");
        self
    }

    /// Add a raw trace
    pub fn trace(&self, name: &str, text: &str) -> &Self {
        let path = self.root().join("traces").join(format!("{}.trc", name));
        fs::write(path, text).expect("write trace");
        self
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.root().join(rel)).expect("read output")
    }

    /// Config pointing at this workspace, reading JSON programs directly
    pub fn config(&self) -> PipelineConfig {
        PipelineConfig {
            benchmarks_dir: self.root().join("benchmarks"),
            traces_dir: self.root().join("traces"),
            output_dir: self.root().join("merged"),
            program_extension: "json".to_string(),
            jobs: 2,
            ..PipelineConfig::default()
        }
    }
}
