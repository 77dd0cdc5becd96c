//! Build parameters.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::warn;

use crate::consts::{DEFAULT_TOOLS_VERSION, ENV_CONTINUE_ON_FAILURE, ENV_ISOLATE, ENV_MAX_WORKERS};

/// Whether nested requests may build projects the session did not ask for directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProjectIsolation {
  #[default]
  Off,
  /// A nested request for another configuration must be satisfied from the results cache.
  On,
}

/// Parameters for a build session.
#[derive(Debug, Clone)]
pub struct BuildParameters {
  /// Requests executing at the same time.
  pub max_workers: usize,

  /// Keep building sibling targets after a target fails.
  pub continue_on_failure: bool,

  pub isolation: ProjectIsolation,

  /// Results cache files merged into the session at begin.
  pub input_results_caches: Vec<PathBuf>,

  /// Where the session's results are written at shutdown.
  pub output_results_cache: Option<PathBuf>,

  pub tools_version: String,

  /// Defaults for every top-level request. A request's own properties win.
  pub global_properties: BTreeMap<String, String>,
}

impl Default for BuildParameters {
  fn default() -> Self {
    Self {
      max_workers: num_cpus(),
      continue_on_failure: false,
      isolation: ProjectIsolation::Off,
      input_results_caches: Vec::new(),
      output_results_cache: None,
      tools_version: DEFAULT_TOOLS_VERSION.to_string(),
      global_properties: BTreeMap::new(),
    }
  }
}

impl BuildParameters {
  /// Defaults overlaid with `KILN_MAX_WORKERS`, `KILN_CONTINUE_ON_FAILURE` and `KILN_ISOLATE`.
  ///
  /// Unparseable values are ignored with a warning.
  pub fn from_env() -> Self {
    let mut params = Self::default();

    if let Ok(value) = std::env::var(ENV_MAX_WORKERS) {
      match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => params.max_workers = n,
        _ => warn!(var = ENV_MAX_WORKERS, value = %value, "ignoring invalid worker count"),
      }
    }
    if let Some(flag) = env_flag(ENV_CONTINUE_ON_FAILURE) {
      params.continue_on_failure = flag;
    }
    if let Some(flag) = env_flag(ENV_ISOLATE) {
      params.isolation = if flag { ProjectIsolation::On } else { ProjectIsolation::Off };
    }
    params
  }
}

fn env_flag(name: &str) -> Option<bool> {
  let value = std::env::var(name).ok()?;
  match value.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Some(true),
    "0" | "false" | "no" | "off" | "" => Some(false),
    _ => {
      warn!(var = name, value = %value, "ignoring invalid boolean");
      None
    }
  }
}

fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
