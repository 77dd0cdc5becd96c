//! Request and result types for the coordinator.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::cache::{ConfigurationId, IdentityError};
use crate::events::EventContext;
use crate::project::Item;
use crate::target::TargetResult;

/// Identifies one top-level submission and everything it spawns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubmissionId(pub u32);

/// Identifies one request (top-level or nested) within the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequestId(pub u32);

impl std::fmt::Display for SubmissionId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl std::fmt::Display for RequestId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// What a caller asks to build, before the configuration is resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildRequestData {
  pub project_path: PathBuf,
  pub global_properties: BTreeMap<String, String>,
  /// Defaults to the session's (top-level) or the parent's (nested) tools version.
  pub tools_version: Option<String>,
  /// Empty means the project's default targets.
  pub targets: Vec<String>,
  pub skip_nonexistent_targets: bool,
}

impl BuildRequestData {
  pub fn new(project_path: impl Into<PathBuf>) -> Self {
    Self {
      project_path: project_path.into(),
      ..Default::default()
    }
  }

  pub fn with_targets<I, S>(mut self, targets: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.targets = targets.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.global_properties.insert(name.into(), value.into());
    self
  }

  pub fn with_properties(mut self, properties: BTreeMap<String, String>) -> Self {
    self.global_properties.extend(properties);
    self
  }

  pub fn with_tools_version(mut self, tools_version: impl Into<String>) -> Self {
    self.tools_version = Some(tools_version.into());
    self
  }

  pub fn skip_nonexistent_targets(mut self, skip: bool) -> Self {
    self.skip_nonexistent_targets = skip;
    self
  }
}

/// A resolved request, consumed once by the coordinator.
#[derive(Debug, Clone)]
pub struct BuildRequest {
  pub submission_id: SubmissionId,
  pub request_id: RequestId,
  pub configuration_id: ConfigurationId,
  pub targets: Vec<String>,
  pub parent: Option<RequestId>,
  pub context: EventContext,
  pub skip_nonexistent_targets: bool,
}

/// Request-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  #[error("invalid configuration: {0}")]
  InvalidIdentity(#[from] IdentityError),

  #[error("failed to load project {path}: {message}")]
  ProjectLoad { path: PathBuf, message: String },

  #[error("circular dependency: {}", .chain.join(" -> "))]
  CircularDependency { chain: Vec<String> },

  #[error("target \"{target}\" does not exist in project {project}")]
  TargetNotFound { target: String, project: PathBuf },

  #[error("project {project} is not in the results cache and isolation forbids building it")]
  IsolationViolation { project: PathBuf, targets: Vec<String> },

  #[error("build was canceled")]
  Canceled,

  #[error("request worker panicked: {0}")]
  WorkerPanicked(String),

  #[error("worker pool is closed")]
  PoolClosed,
}

/// The outcome of one request.
///
/// `targets` holds only the targets the request named (or the defaults). Results of
/// dependencies stay in the results cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
  pub submission_id: SubmissionId,
  pub request_id: Option<RequestId>,
  pub configuration_id: Option<ConfigurationId>,
  pub targets: BTreeMap<String, TargetResult>,
  pub default_targets: Vec<String>,
  pub overall_success: bool,
  pub canceled: bool,
  pub error: Option<BuildError>,
}

impl BuildResult {
  /// A result that never reached target execution.
  pub fn failed(
    submission_id: SubmissionId,
    request_id: Option<RequestId>,
    configuration_id: Option<ConfigurationId>,
    error: BuildError,
  ) -> Self {
    Self {
      submission_id,
      request_id,
      configuration_id,
      targets: BTreeMap::new(),
      default_targets: Vec::new(),
      overall_success: false,
      canceled: matches!(error, BuildError::Canceled),
      error: Some(error),
    }
  }

  pub fn is_success(&self) -> bool {
    self.overall_success
  }

  /// Items produced by the named targets, ordered by target name.
  pub fn items(&self) -> Vec<Item> {
    self.targets.values().flat_map(|r| r.items.iter().cloned()).collect()
  }
}
