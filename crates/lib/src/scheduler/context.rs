//! Session-wide state shared by every request.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::cache::{ConfigCache, ConfigurationId, ResultsCache};
use crate::events::LoggingService;
use crate::incremental::TimestampSource;
use crate::project::ProjectLoader;
use crate::session::BuildParameters;
use crate::task::TaskRegistry;

use super::cancel::CancellationToken;
use super::inflight::InFlightTargets;
use super::pool::WorkerPool;
use super::types::{RequestId, SubmissionId};
use super::wait_graph::WaitGraph;

/// A top-level request as submitted: its configuration and the targets it named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopLevelBuild {
  pub configuration: ConfigurationId,
  pub targets: Vec<String>,
}

/// Everything requests share for the lifetime of a session.
pub struct SessionContext {
  pub params: BuildParameters,
  pub configs: ConfigCache,
  pub results: ResultsCache,
  pub inflight: InFlightTargets,
  pub waits: Arc<WaitGraph>,
  pub pool: WorkerPool,
  pub cancel: CancellationToken,
  pub logging: LoggingService,
  pub registry: TaskRegistry,
  pub loader: Arc<dyn ProjectLoader>,
  pub timestamps: Arc<dyn TimestampSource>,
  top_level: Mutex<Vec<TopLevelBuild>>,
  next_submission: AtomicU32,
  next_request: AtomicU32,
  next_project_context: AtomicU32,
  next_target: AtomicU32,
  next_task: AtomicU32,
}

impl SessionContext {
  pub fn new(
    params: BuildParameters,
    registry: TaskRegistry,
    loader: Arc<dyn ProjectLoader>,
    timestamps: Arc<dyn TimestampSource>,
    logging: LoggingService,
  ) -> Self {
    let waits = Arc::new(WaitGraph::new());
    Self {
      pool: WorkerPool::new(params.max_workers),
      params,
      configs: ConfigCache::new(),
      results: ResultsCache::new(),
      inflight: InFlightTargets::new(waits.clone()),
      waits,
      cancel: CancellationToken::new(),
      logging,
      registry,
      loader,
      timestamps,
      top_level: Mutex::new(Vec::new()),
      next_submission: AtomicU32::new(1),
      next_request: AtomicU32::new(1),
      next_project_context: AtomicU32::new(1),
      next_target: AtomicU32::new(1),
      next_task: AtomicU32::new(1),
    }
  }

  pub fn next_submission_id(&self) -> SubmissionId {
    SubmissionId(self.next_submission.fetch_add(1, Ordering::Relaxed))
  }

  pub fn next_request_id(&self) -> RequestId {
    RequestId(self.next_request.fetch_add(1, Ordering::Relaxed))
  }

  pub fn next_project_context_id(&self) -> u32 {
    self.next_project_context.fetch_add(1, Ordering::Relaxed)
  }

  pub fn next_target_id(&self) -> u32 {
    self.next_target.fetch_add(1, Ordering::Relaxed)
  }

  pub fn next_task_id(&self) -> u32 {
    self.next_task.fetch_add(1, Ordering::Relaxed)
  }

  pub(crate) fn record_top_level(&self, configuration: ConfigurationId, targets: Vec<String>) {
    self
      .top_level
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(TopLevelBuild { configuration, targets });
  }

  /// Top-level requests in submission order.
  pub fn top_level_builds(&self) -> Vec<TopLevelBuild> {
    self.top_level.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }
}

impl std::fmt::Debug for SessionContext {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SessionContext")
      .field("params", &self.params)
      .field("configurations", &self.configs.len())
      .field("workers", &self.pool.size())
      .finish()
  }
}
