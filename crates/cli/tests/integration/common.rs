//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Get path to a fixture file.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

/// Read fixture content.
pub fn fixture_content(name: &str) -> String {
  std::fs::read_to_string(fixture_path(name)).unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", name, e))
}

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding the project files, so files
/// created by tasks never land in the fixtures directory.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn empty() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  /// Copy fixtures into the temp directory under their own names.
  pub fn with_fixtures(names: &[&str]) -> Self {
    let env = Self::empty();
    for name in names {
      env.write_file(name, &fixture_content(name));
    }
    env
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  /// Absolute path of a file in the temp directory.
  pub fn path(&self, relative_path: &str) -> PathBuf {
    let root = dunce::canonicalize(self.temp.path()).unwrap_or_else(|_| self.temp.path().to_path_buf());
    root.join(relative_path)
  }

  /// Get a Command for the kiln binary with the environment cleared of kiln overrides.
  pub fn kiln_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("kiln");
    cmd.current_dir(self.temp.path());
    cmd.env_remove("KILN_MAX_WORKERS");
    cmd.env_remove("KILN_CONTINUE_ON_FAILURE");
    cmd.env_remove("KILN_ISOLATE");
    cmd.env_remove("RUST_LOG");
    cmd
  }

  /// `kiln build <project> -o json`, parsed.
  pub fn build_json(&self, project: &str, extra: &[&str]) -> (bool, serde_json::Value) {
    let output = self
      .kiln_cmd()
      .arg("build")
      .arg(self.path(project))
      .args(["-o", "json"])
      .args(extra)
      .output()
      .unwrap();
    let report = serde_json::from_slice(&output.stdout)
      .unwrap_or_else(|e| panic!("stdout is not JSON ({}): {}", e, String::from_utf8_lossy(&output.stdout)));
    (output.status.success(), report)
  }
}
