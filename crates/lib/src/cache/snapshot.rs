//! Results cache files.
//!
//! A cache file carries a subset of the configuration cache and the results cache
//! from one session to another. Only the root configuration (the smallest id of the
//! subgraph that shares the file) is written, and only results for targets reachable
//! from an allow-list. Targets outside the allow-list are absent from the file.
//!
//! # Layout
//!
//! ```text
//! {
//!   "version": 1,
//!   "run_id": "…",
//!   "configurations": [ { "id": 1, "run_id": "…", "project_path": "…", … } ],
//!   "results": [ { "configuration_id": 1, "default_targets": [...], "targets": { … } } ]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use crate::consts::RESULTS_CACHE_VERSION;
use crate::project::EvaluatedProject;
use crate::target::TargetResult;

use super::config::{ConfigCache, ConfigIdentity, ConfigurationId, IdentityError};
use super::results::{ConfigResults, ResultsCache};

#[derive(Debug, Error)]
pub enum CacheSnapshotError {
  #[error("failed to read cache file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write cache file {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse cache file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to serialize cache file: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported cache file version: {0}")]
  UnsupportedVersion(u32),

  #[error("configuration {0} appears more than once")]
  DuplicateConfiguration(ConfigurationId),

  #[error("configurations {first} and {second} share an identity")]
  DuplicateIdentity {
    first: ConfigurationId,
    second: ConfigurationId,
  },

  #[error("results reference unknown configuration {0}")]
  UnknownConfiguration(ConfigurationId),

  #[error("configuration {id} was produced by run {found}, expected {expected}")]
  MixedRuns {
    id: ConfigurationId,
    expected: String,
    found: String,
  },

  #[error("configuration {0} has no results")]
  EmptyResults(ConfigurationId),

  #[error("invalid configuration identity: {0}")]
  InvalidIdentity(#[from] IdentityError),
}

/// A configuration as written to a cache file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedConfiguration {
  pub id: ConfigurationId,
  pub run_id: String,
  pub project_path: PathBuf,
  pub tools_version: String,
  #[serde(default)]
  pub global_properties: BTreeMap<String, String>,
}

impl CachedConfiguration {
  pub fn identity(&self) -> Result<ConfigIdentity, IdentityError> {
    ConfigIdentity::new(&self.project_path, &self.tools_version, self.global_properties.clone())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResults {
  pub configuration_id: ConfigurationId,
  #[serde(default)]
  pub default_targets: Vec<String>,
  pub targets: BTreeMap<String, TargetResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheFile {
  pub version: u32,
  pub run_id: String,
  pub configurations: Vec<CachedConfiguration>,
  pub results: Vec<CachedResults>,
}

impl CacheFile {
  pub fn new(run_id: impl Into<String>) -> Self {
    Self {
      version: RESULTS_CACHE_VERSION,
      run_id: run_id.into(),
      configurations: Vec::new(),
      results: Vec::new(),
    }
  }

  /// Check the subset invariants a reader relies on.
  ///
  /// Every configuration must be unique by id and identity. More than one
  /// configuration is only accepted when all were produced by the file's own run.
  /// Every result block must name a listed configuration and carry at least one target.
  pub fn validate(&self) -> Result<(), CacheSnapshotError> {
    if self.version != RESULTS_CACHE_VERSION {
      return Err(CacheSnapshotError::UnsupportedVersion(self.version));
    }

    let mut ids = BTreeSet::new();
    let mut identities: BTreeMap<ConfigIdentity, ConfigurationId> = BTreeMap::new();
    for config in &self.configurations {
      if !ids.insert(config.id) {
        return Err(CacheSnapshotError::DuplicateConfiguration(config.id));
      }
      if self.configurations.len() > 1 && config.run_id != self.run_id {
        return Err(CacheSnapshotError::MixedRuns {
          id: config.id,
          expected: self.run_id.clone(),
          found: config.run_id.clone(),
        });
      }
      let identity = config.identity()?;
      if let Some(first) = identities.insert(identity, config.id) {
        return Err(CacheSnapshotError::DuplicateIdentity {
          first,
          second: config.id,
        });
      }
    }

    let mut seen = BTreeSet::new();
    for results in &self.results {
      if !ids.contains(&results.configuration_id) {
        return Err(CacheSnapshotError::UnknownConfiguration(results.configuration_id));
      }
      if !seen.insert(results.configuration_id) {
        return Err(CacheSnapshotError::DuplicateConfiguration(results.configuration_id));
      }
      if results.targets.is_empty() {
        return Err(CacheSnapshotError::EmptyResults(results.configuration_id));
      }
    }
    Ok(())
  }
}

/// Identifier for the current process's run, written into every cache file.
pub fn generate_run_id() -> String {
  let nanos = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_nanos())
    .unwrap_or_default();
  format!("{:x}-{:x}", nanos, std::process::id())
}

/// Build a cache file for the root configuration of a session.
///
/// `allow_list` names the targets whose results (and the results of every target
/// they reach) are kept. An empty allow-list falls back to the project's default
/// targets.
pub fn build_cache_file(
  configs: &ConfigCache,
  results: &ResultsCache,
  root: ConfigurationId,
  allow_list: &[String],
  project: &EvaluatedProject,
  run_id: &str,
) -> Result<CacheFile, CacheSnapshotError> {
  let config = configs.get(root).ok_or(CacheSnapshotError::UnknownConfiguration(root))?;
  let recorded = results.results_for(root).unwrap_or_default();

  let roots = if allow_list.is_empty() {
    project.default_targets()
  } else {
    allow_list.to_vec()
  };
  let reachable: BTreeSet<String> = project.reachable_from(&roots).into_iter().collect();

  let targets: BTreeMap<String, TargetResult> = recorded
    .targets
    .into_iter()
    .filter(|(name, _)| reachable.contains(name))
    .collect();

  let identity = config.identity();
  let mut file = CacheFile::new(run_id);
  file.configurations.push(CachedConfiguration {
    id: root,
    run_id: run_id.to_string(),
    project_path: identity.project_path().to_path_buf(),
    tools_version: identity.tools_version().to_string(),
    global_properties: identity.global_properties().clone(),
  });
  if !targets.is_empty() {
    file.results.push(CachedResults {
      configuration_id: root,
      default_targets: recorded.default_targets,
      targets,
    });
  }
  debug!(config = %root, targets = file.results.first().map(|r| r.targets.len()).unwrap_or(0), "built cache file");
  Ok(file)
}

/// Write a cache file atomically.
pub fn write_cache_file(path: &Path, file: &CacheFile) -> Result<(), CacheSnapshotError> {
  let write_err = |source: io::Error| CacheSnapshotError::Write {
    path: path.to_path_buf(),
    source,
  };

  let dir = match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
    _ => PathBuf::from("."),
  };
  fs::create_dir_all(&dir).map_err(write_err)?;

  let content = serde_json::to_string_pretty(file).map_err(CacheSnapshotError::Serialize)?;
  let mut temp = NamedTempFile::new_in(&dir).map_err(write_err)?;
  temp.write_all(content.as_bytes()).map_err(write_err)?;
  temp.persist(path).map_err(|e| write_err(e.error))?;

  info!(path = %path.display(), "wrote results cache");
  Ok(())
}

/// Read and validate a cache file.
pub fn read_cache_file(path: &Path) -> Result<CacheFile, CacheSnapshotError> {
  let content = fs::read_to_string(path).map_err(|source| CacheSnapshotError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  let file: CacheFile = serde_json::from_str(&content).map_err(|source| CacheSnapshotError::Parse {
    path: path.to_path_buf(),
    source,
  })?;
  file.validate()?;
  Ok(file)
}

/// Merge a cache file into live caches.
///
/// Configurations are interned under fresh live ids; results follow their
/// configuration. Returns the mapping from file ids to live ids.
pub fn import_cache_file(
  file: &CacheFile,
  configs: &ConfigCache,
  results: &ResultsCache,
) -> Result<BTreeMap<ConfigurationId, ConfigurationId>, CacheSnapshotError> {
  file.validate()?;

  let mut mapping = BTreeMap::new();
  for cached in &file.configurations {
    let live = configs.get_or_create_id(cached.identity()?);
    mapping.insert(cached.id, live);
  }

  for cached in &file.results {
    let live = mapping
      .get(&cached.configuration_id)
      .copied()
      .ok_or(CacheSnapshotError::UnknownConfiguration(cached.configuration_id))?;
    results.merge(
      live,
      ConfigResults {
        targets: cached.targets.clone(),
        default_targets: cached.default_targets.clone(),
      },
    );
    debug!(
      file_id = %cached.configuration_id,
      config = %live,
      targets = cached.targets.len(),
      "imported cached results"
    );
  }
  Ok(mapping)
}
