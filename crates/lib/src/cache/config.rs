//! Configuration cache.
//!
//! A configuration is a project path, a tools version and a set of global properties.
//! Equal identities are interned to the same `ConfigurationId` for the lifetime of
//! the session, and the project behind a configuration is evaluated at most once.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::lookup::{ProjectState, ScopeChanges};
use crate::project::{EvaluatedProject, LoadError, ProjectLoader};
use crate::util::path::normalize_lexically;

/// Errors for malformed configuration identities.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
  #[error("project path is empty")]
  EmptyPath,

  #[error("tools version is empty")]
  EmptyToolsVersion,

  #[error("invalid global property name: {0:?}")]
  InvalidPropertyName(String),

  #[error("cannot resolve project path {path}: {message}")]
  Resolve { path: PathBuf, message: String },
}

/// The identity of a configuration. Compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConfigIdentity {
  project_path: PathBuf,
  tools_version: String,
  global_properties: BTreeMap<String, String>,
}

impl ConfigIdentity {
  /// Validate and normalize an identity.
  ///
  /// Relative paths are made absolute against the current directory, then `.` and
  /// `..` components are removed lexically.
  pub fn new(
    project_path: impl AsRef<Path>,
    tools_version: impl Into<String>,
    global_properties: BTreeMap<String, String>,
  ) -> Result<Self, IdentityError> {
    let project_path = project_path.as_ref();
    if project_path.as_os_str().is_empty() {
      return Err(IdentityError::EmptyPath);
    }

    let tools_version = tools_version.into();
    if tools_version.trim().is_empty() {
      return Err(IdentityError::EmptyToolsVersion);
    }

    if let Some(bad) = global_properties
      .keys()
      .find(|k| k.trim().is_empty() || k.contains(['$', '@', '%', '(', ')', ';']))
    {
      return Err(IdentityError::InvalidPropertyName(bad.clone()));
    }

    let absolute = std::path::absolute(project_path).map_err(|e| IdentityError::Resolve {
      path: project_path.to_path_buf(),
      message: e.to_string(),
    })?;

    Ok(Self {
      project_path: normalize_lexically(&absolute),
      tools_version,
      global_properties,
    })
  }

  pub fn project_path(&self) -> &Path {
    &self.project_path
  }

  pub fn tools_version(&self) -> &str {
    &self.tools_version
  }

  pub fn global_properties(&self) -> &BTreeMap<String, String> {
    &self.global_properties
  }
}

impl std::fmt::Display for ConfigIdentity {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.project_path.display())?;
    if !self.global_properties.is_empty() {
      let props: Vec<String> = self.global_properties.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
      write!(f, " [{}]", props.join(";"))?;
    }
    Ok(())
  }
}

/// Session-unique configuration id. Ids start at 1 and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigurationId(pub u32);

impl std::fmt::Display for ConfigurationId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// An evaluated project and its committed item/property state.
#[derive(Debug)]
pub struct LoadedProject {
  project: EvaluatedProject,
  state: Mutex<Arc<ProjectState>>,
}

impl LoadedProject {
  pub fn new(project: EvaluatedProject) -> Self {
    let state = ProjectState::from_instance(project.instance());
    Self {
      project,
      state: Mutex::new(Arc::new(state)),
    }
  }

  pub fn project(&self) -> &EvaluatedProject {
    &self.project
  }

  /// Snapshot of the committed state.
  pub fn state(&self) -> Arc<ProjectState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }

  /// Commit a finished target's lookup changes.
  pub fn commit(&self, changes: ScopeChanges) {
    if changes.is_empty() {
      return;
    }
    let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    Arc::make_mut(&mut *guard).apply(changes);
  }
}

/// A configuration plus its lazily evaluated project.
#[derive(Debug)]
pub struct BuildRequestConfiguration {
  id: ConfigurationId,
  identity: ConfigIdentity,
  explicitly_loaded: AtomicBool,
  loaded: OnceCell<Arc<LoadedProject>>,
}

impl BuildRequestConfiguration {
  fn new(id: ConfigurationId, identity: ConfigIdentity) -> Self {
    Self {
      id,
      identity,
      explicitly_loaded: AtomicBool::new(false),
      loaded: OnceCell::new(),
    }
  }

  pub fn id(&self) -> ConfigurationId {
    self.id
  }

  pub fn identity(&self) -> &ConfigIdentity {
    &self.identity
  }

  /// Whether a top-level request named this configuration directly.
  pub fn is_explicitly_loaded(&self) -> bool {
    self.explicitly_loaded.load(Ordering::Acquire)
  }

  pub fn mark_explicitly_loaded(&self) {
    self.explicitly_loaded.store(true, Ordering::Release);
  }

  pub fn is_loaded(&self) -> bool {
    self.loaded.initialized()
  }

  /// Evaluate the project on first use.
  ///
  /// Concurrent callers share a single evaluation. A failed evaluation is not
  /// remembered; the next caller tries again.
  pub async fn loaded(&self, loader: &dyn ProjectLoader) -> Result<Arc<LoadedProject>, LoadError> {
    let loaded = self
      .loaded
      .get_or_try_init(|| async {
        let instance = loader.load(&self.identity)?;
        debug!(config = %self.id, project = %self.identity, "evaluated project");
        Ok::<_, LoadError>(Arc::new(LoadedProject::new(EvaluatedProject::new(instance))))
      })
      .await?;
    Ok(loaded.clone())
  }
}

/// Interns configurations by identity.
#[derive(Debug)]
pub struct ConfigCache {
  next_id: AtomicU32,
  by_identity: DashMap<ConfigIdentity, ConfigurationId>,
  by_id: DashMap<ConfigurationId, Arc<BuildRequestConfiguration>>,
}

impl Default for ConfigCache {
  fn default() -> Self {
    Self::new()
  }
}

impl ConfigCache {
  pub fn new() -> Self {
    Self {
      next_id: AtomicU32::new(1),
      by_identity: DashMap::new(),
      by_id: DashMap::new(),
    }
  }

  /// Return the configuration for `identity`, creating it on first sight.
  ///
  /// The identity's shard stays locked until the new configuration is published, so
  /// concurrent callers with equal identities always observe the same id.
  pub fn get_or_create(&self, identity: ConfigIdentity) -> Arc<BuildRequestConfiguration> {
    match self.by_identity.entry(identity) {
      Entry::Occupied(entry) => {
        let id = *entry.get();
        if let Some(config) = self.by_id.get(&id) {
          return config.value().clone();
        }
        // Unreachable while both maps are only written here.
        let config = Arc::new(BuildRequestConfiguration::new(id, entry.key().clone()));
        self.by_id.insert(id, config.clone());
        config
      }
      Entry::Vacant(entry) => {
        let id = ConfigurationId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let config = Arc::new(BuildRequestConfiguration::new(id, entry.key().clone()));
        self.by_id.insert(id, config.clone());
        info!(config = %id, project = %entry.key(), "created configuration");
        entry.insert(id);
        config
      }
    }
  }

  pub fn get_or_create_id(&self, identity: ConfigIdentity) -> ConfigurationId {
    self.get_or_create(identity).id()
  }

  pub fn has_configuration(&self, id: ConfigurationId) -> bool {
    self.by_id.contains_key(&id)
  }

  pub fn get(&self, id: ConfigurationId) -> Option<Arc<BuildRequestConfiguration>> {
    self.by_id.get(&id).map(|c| c.value().clone())
  }

  pub fn find(&self, identity: &ConfigIdentity) -> Option<ConfigurationId> {
    self.by_identity.get(identity).map(|id| *id.value())
  }

  pub fn len(&self) -> usize {
    self.by_id.len()
  }

  pub fn is_empty(&self) -> bool {
    self.by_id.is_empty()
  }

  /// All configurations, ordered by id.
  pub fn configurations(&self) -> Vec<Arc<BuildRequestConfiguration>> {
    let mut all: Vec<_> = self.by_id.iter().map(|entry| entry.value().clone()).collect();
    all.sort_by_key(|c| c.id());
    all
  }
}
