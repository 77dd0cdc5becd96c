//! Project loaders.
//!
//! A loader turns a configuration identity into an evaluated `ProjectInstance`.
//! Global properties from the identity always override properties the project sets.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tracing::debug;

use crate::cache::ConfigIdentity;
use crate::consts::{PROJECT_DIR_PROPERTY, PROJECT_PATH_PROPERTY};
use crate::util::path::normalize_lexically;

use super::types::ProjectInstance;

/// Errors that can occur while loading a project.
#[derive(Debug, Error)]
pub enum LoadError {
  #[error("project file not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to read project {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse project {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

/// Seam to the evaluation layer.
pub trait ProjectLoader: Send + Sync {
  fn load(&self, identity: &ConfigIdentity) -> Result<ProjectInstance, LoadError>;
}

/// Apply identity-derived state to a freshly loaded instance.
fn finish_instance(mut instance: ProjectInstance, identity: &ConfigIdentity) -> ProjectInstance {
  instance.path = identity.project_path().to_path_buf();
  for (name, value) in identity.global_properties() {
    instance.properties.insert(name.clone(), value.clone());
  }
  instance.properties.insert(
    PROJECT_PATH_PROPERTY.to_string(),
    instance.path.to_string_lossy().into_owned(),
  );
  instance.properties.insert(
    PROJECT_DIR_PROPERTY.to_string(),
    instance.directory().to_string_lossy().into_owned(),
  );
  instance
}

/// Loads projects serialized as JSON `ProjectInstance` documents.
#[derive(Debug, Default, Clone)]
pub struct JsonProjectLoader;

impl JsonProjectLoader {
  pub fn new() -> Self {
    Self
  }
}

impl ProjectLoader for JsonProjectLoader {
  fn load(&self, identity: &ConfigIdentity) -> Result<ProjectInstance, LoadError> {
    let path = identity.project_path();
    let content = fs::read_to_string(path).map_err(|e| {
      if e.kind() == io::ErrorKind::NotFound {
        LoadError::NotFound(path.to_path_buf())
      } else {
        LoadError::Read {
          path: path.to_path_buf(),
          source: e,
        }
      }
    })?;

    let instance: ProjectInstance = serde_json::from_str(&content).map_err(|e| LoadError::Parse {
      path: path.to_path_buf(),
      source: e,
    })?;

    debug!(project = %path.display(), targets = instance.targets.len(), "loaded project");
    Ok(finish_instance(instance, identity))
  }
}

/// Serves projects registered up front, keyed by normalized path.
#[derive(Debug, Default)]
pub struct InMemoryProjectLoader {
  projects: HashMap<PathBuf, ProjectInstance>,
  loads: AtomicUsize,
}

impl InMemoryProjectLoader {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_project(mut self, instance: ProjectInstance) -> Self {
    self.projects.insert(normalize_lexically(&instance.path), instance);
    self
  }

  /// How many times `load` has been called.
  pub fn load_count(&self) -> usize {
    self.loads.load(Ordering::SeqCst)
  }
}

impl ProjectLoader for InMemoryProjectLoader {
  fn load(&self, identity: &ConfigIdentity) -> Result<ProjectInstance, LoadError> {
    self.loads.fetch_add(1, Ordering::SeqCst);
    let instance = self
      .projects
      .get(identity.project_path())
      .cloned()
      .ok_or_else(|| LoadError::NotFound(identity.project_path().to_path_buf()))?;
    Ok(finish_instance(instance, identity))
  }
}
