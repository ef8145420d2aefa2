//! Common test utilities for timejet integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't touch the
//! user's `~/.local/share/timejet/` or `~/.config/timejet/`.

#![allow(dead_code)]

use assert_cmd::Command;
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

/// A small plan: a project rollup, one rollup with one leaf, a leaf with two
/// people assigned and a milestone.
pub const SAMPLE_PLAN: &str = r#"{
  "project_title": "Apollo programme",
  "tasks": [
    {"unique_id": 1, "name": "Apollo", "outline_level": 1, "outline_number": "1", "summary": true},
    {"unique_id": 2, "name": "Design", "outline_level": 2, "outline_number": "1.1", "summary": true},
    {"unique_id": 3, "name": "Sketch", "outline_level": 3, "outline_number": "1.1.1",
     "baseline_duration_minutes": 900.0, "custom_colour": "teal"},
    {"unique_id": 4, "name": "Build", "outline_level": 2, "outline_number": "1.2", "predecessors": [3]},
    {"unique_id": 5, "name": "Sign-off", "outline_level": 2, "outline_number": "1.3", "milestone": true}
  ],
  "resources": [
    {"unique_id": 10, "name": "ann@acme.test"},
    {"unique_id": 11, "name": "Bob <bob@acme.test>"},
    {"unique_id": 12, "name": "Crane"}
  ],
  "assignments": [
    {"task_uid": 3, "resource_uid": 10},
    {"task_uid": 4, "resource_uid": 10},
    {"task_uid": 4, "resource_uid": 11},
    {"task_uid": 5, "resource_uid": 12}
  ]
}"#;

/// A test environment with isolated data and config.
///
/// - `data_dir`: the data root (via `TJ_DATA_DIR`)
/// - `work_dir`: scratch space for payloads, plans and the config file
///
/// The `tj()` method sets both per-invocation, making tests parallel-safe.
pub struct TestEnv {
    pub data_dir: TempDir,
    pub work_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let env = Self {
            data_dir: TempDir::new().unwrap(),
            work_dir: TempDir::new().unwrap(),
        };
        std::fs::write(env.config_path(), "log-filter \"timejet=warn\"\n").unwrap();
        env
    }

    /// Get a Command for the tj binary with isolated data and config.
    pub fn tj(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_tj"));
        cmd.current_dir(self.work_dir.path());
        cmd.env("TJ_DATA_DIR", self.data_dir.path());
        cmd.env("TJ_CONFIG", self.config_path());
        cmd.env_remove("TJ_LOG");
        cmd
    }

    pub fn data_path(&self) -> &Path {
        self.data_dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.work_dir.path().join("config.kdl")
    }

    pub fn tenant_dir(&self, tenant: &str) -> PathBuf {
        self.data_path().join(tenant)
    }

    /// Write a file into the scratch directory.
    pub fn write_work_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.work_dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Pack `SAMPLE_PLAN` into `<tenant>/apollo.tjp` with `tj doc pack`.
    pub fn pack_sample(&self, tenant: &str) -> PathBuf {
        let plan = self.write_work_file("plan.json", SAMPLE_PLAN);
        let dir = self.tenant_dir(tenant);
        std::fs::create_dir_all(&dir).unwrap();
        let doc = dir.join("apollo.tjp");
        self.tj()
            .args(["doc", "pack"])
            .arg(&plan)
            .arg(&doc)
            .assert()
            .success();
        doc
    }

    /// Pack the sample plan and import it.
    pub fn imported(tenant: &str) -> Self {
        let env = Self::new();
        env.pack_sample(tenant);
        env.tj().args(["import", tenant]).assert().success();
        env
    }

    /// Files in a tenant subdirectory (`reports`, `outbox`).
    pub fn files_in(&self, tenant: &str, sub: &str) -> Vec<PathBuf> {
        let dir = self.tenant_dir(tenant).join(sub);
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries.map(|e| e.unwrap().path()).collect();
        files.sort();
        files
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a command's stdout as JSON.
pub fn parse_json(stdout: &[u8]) -> serde_json::Value {
    serde_json::from_slice(stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({}): {}",
            e,
            String::from_utf8_lossy(stdout)
        )
    })
}
