//! Services available to a running task.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::events::EventContext;
use crate::project::{ContinueOnError, Item};
use crate::scheduler::{BuildError, BuildRequestData, BuildResult, Coordinator, RequestFrame};

/// Handed to [`Task::execute`](super::Task::execute).
///
/// Logging goes to the session's event sinks with the task's correlation context.
/// Nested builds go back through the coordinator; the calling request gives up its
/// worker slot while it waits for them.
pub struct TaskHost {
  coordinator: Coordinator,
  frame: Arc<RequestFrame>,
  context: EventContext,
  task_name: String,
  continue_on_error: ContinueOnError,
  up_to_date: BTreeMap<String, Vec<Item>>,
  errors_logged: AtomicUsize,
  failed_nested: AtomicUsize,
}

impl TaskHost {
  pub(crate) fn new(
    coordinator: Coordinator,
    frame: Arc<RequestFrame>,
    context: EventContext,
    task_name: impl Into<String>,
    continue_on_error: ContinueOnError,
    up_to_date: BTreeMap<String, Vec<Item>>,
  ) -> Self {
    Self {
      coordinator,
      frame,
      context,
      task_name: task_name.into(),
      continue_on_error,
      up_to_date,
      errors_logged: AtomicUsize::new(0),
      failed_nested: AtomicUsize::new(0),
    }
  }

  pub fn task_name(&self) -> &str {
    &self.task_name
  }

  pub fn context(&self) -> EventContext {
    self.context
  }

  pub fn log_message(&self, text: impl Into<String>) {
    self.coordinator.context().logging.message(self.context, text);
  }

  pub fn log_warning(&self, text: impl Into<String>) {
    self.coordinator.context().logging.warning(self.context, text);
  }

  /// Log an error. Tasks marked `WarnAndContinue` have their errors logged as warnings.
  pub fn log_error(&self, text: impl Into<String>) {
    self.errors_logged.fetch_add(1, Ordering::Relaxed);
    report_error(&self.coordinator, self.context, self.continue_on_error, text.into());
  }

  pub fn has_logged_errors(&self) -> bool {
    self.errors_logged.load(Ordering::Relaxed) > 0
  }

  /// Whether a nested build started by this task failed. Failed builds log their own errors.
  pub fn has_failed_nested_builds(&self) -> bool {
    self.failed_nested.load(Ordering::Relaxed) > 0
  }

  fn count_failures(&self, results: &[BuildResult]) {
    let failed = results.iter().filter(|r| !r.is_success()).count();
    self.failed_nested.fetch_add(failed, Ordering::Relaxed);
  }

  /// Items of `item_type` that an incremental build left out because they are up to date.
  pub fn up_to_date_items(&self, item_type: &str) -> &[Item] {
    self.up_to_date.get(item_type).map(Vec::as_slice).unwrap_or_default()
  }

  pub fn is_cancelled(&self) -> bool {
    self.coordinator.context().cancel.is_cancelled()
  }

  pub fn project_path(&self) -> &Path {
    self.frame.config.identity().project_path()
  }

  pub fn project_directory(&self) -> &Path {
    self.project_path().parent().unwrap_or(Path::new("."))
  }

  /// Build targets of the calling project as a nested request.
  pub async fn call_targets(&self, targets: Vec<String>) -> BuildResult {
    let identity = self.frame.config.identity();
    let data = BuildRequestData::new(identity.project_path())
      .with_properties(identity.global_properties().clone())
      .with_tools_version(identity.tools_version())
      .with_targets(targets);
    let mut results = self.coordinator.submit_nested(&self.frame, vec![data]).await;
    self.count_failures(&results);
    results.pop().unwrap_or_else(|| {
      BuildResult::failed(
        self.frame.request.submission_id,
        None,
        Some(self.frame.config.id()),
        BuildError::PoolClosed,
      )
    })
  }

  /// Build other projects as nested requests. Results come back in request order.
  pub async fn build_projects(&self, requests: Vec<BuildRequestData>) -> Vec<BuildResult> {
    let results = self.coordinator.submit_nested(&self.frame, requests).await;
    self.count_failures(&results);
    results
  }
}

impl std::fmt::Debug for TaskHost {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TaskHost")
      .field("task", &self.task_name)
      .field("context", &self.context)
      .finish()
  }
}

/// Log a task error, downgraded to a warning under `WarnAndContinue`.
pub(crate) fn report_error(coordinator: &Coordinator, context: EventContext, mode: ContinueOnError, text: String) {
  let logging = &coordinator.context().logging;
  match mode {
    ContinueOnError::WarnAndContinue => logging.warning(context, text),
    ContinueOnError::ErrorAndStop | ContinueOnError::ErrorAndContinue => logging.error(context, text),
  }
}
