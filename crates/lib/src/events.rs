//! Structured build events.
//!
//! The backend never renders output. It emits `BuildEvent`s carrying an
//! `EventContext` that is enough to rebuild the call tree (submission → project →
//! target → task). Sinks decide what to do with them.

use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{Level, debug, error, info, warn};

use crate::target::TargetResultCode;

/// Correlation ids attached to every event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventContext {
  pub submission_id: u32,
  pub node_id: u32,
  pub project_context_id: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target_id: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub task_id: Option<u32>,
}

impl EventContext {
  pub fn with_target(self, target_id: u32) -> Self {
    Self {
      target_id: Some(target_id),
      task_id: None,
      ..self
    }
  }

  pub fn with_task(self, task_id: u32) -> Self {
    Self {
      task_id: Some(task_id),
      ..self
    }
  }
}

/// Why a target did no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
  ConditionFalse,
  UpToDate,
  NoItems,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildEvent {
  BuildStarted,
  BuildFinished {
    succeeded: bool,
  },
  ProjectStarted {
    context: EventContext,
    project: String,
    targets: Vec<String>,
    parent_request: Option<u32>,
  },
  ProjectFinished {
    context: EventContext,
    project: String,
    succeeded: bool,
  },
  TargetStarted {
    context: EventContext,
    target: String,
  },
  TargetSkipped {
    context: EventContext,
    target: String,
    reason: SkipReason,
  },
  TargetFinished {
    context: EventContext,
    target: String,
    code: TargetResultCode,
  },
  TaskStarted {
    context: EventContext,
    task: String,
  },
  TaskFinished {
    context: EventContext,
    task: String,
    succeeded: bool,
  },
  Message {
    context: EventContext,
    text: String,
  },
  Warning {
    context: EventContext,
    text: String,
  },
  Error {
    context: EventContext,
    text: String,
  },
}

impl BuildEvent {
  pub fn context(&self) -> Option<&EventContext> {
    match self {
      BuildEvent::BuildStarted | BuildEvent::BuildFinished { .. } => None,
      BuildEvent::ProjectStarted { context, .. }
      | BuildEvent::ProjectFinished { context, .. }
      | BuildEvent::TargetStarted { context, .. }
      | BuildEvent::TargetSkipped { context, .. }
      | BuildEvent::TargetFinished { context, .. }
      | BuildEvent::TaskStarted { context, .. }
      | BuildEvent::TaskFinished { context, .. }
      | BuildEvent::Message { context, .. }
      | BuildEvent::Warning { context, .. }
      | BuildEvent::Error { context, .. } => Some(context),
    }
  }

  pub fn is_error(&self) -> bool {
    matches!(self, BuildEvent::Error { .. })
  }

  /// Tracing level used when the event is forwarded to logs.
  pub fn level(&self) -> Level {
    match self {
      BuildEvent::Error { .. } => Level::ERROR,
      BuildEvent::Warning { .. } => Level::WARN,
      BuildEvent::BuildStarted
      | BuildEvent::BuildFinished { .. }
      | BuildEvent::ProjectStarted { .. }
      | BuildEvent::ProjectFinished { .. }
      | BuildEvent::Message { .. } => Level::INFO,
      _ => Level::DEBUG,
    }
  }
}

/// Receives build events. Implementations must not block.
pub trait EventSink: Send + Sync {
  fn emit(&self, event: &BuildEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

impl EventSink for TracingSink {
  fn emit(&self, event: &BuildEvent) {
    match event {
      BuildEvent::Error { context, text } => {
        error!(submission = context.submission_id, target_id = ?context.target_id, "{}", text)
      }
      BuildEvent::Warning { context, text } => {
        warn!(submission = context.submission_id, target_id = ?context.target_id, "{}", text)
      }
      BuildEvent::Message { context, text } => info!(submission = context.submission_id, "{}", text),
      BuildEvent::BuildStarted => info!("build started"),
      BuildEvent::BuildFinished { succeeded } => info!(succeeded, "build finished"),
      BuildEvent::ProjectStarted { project, targets, .. } => {
        info!(project = %project, targets = ?targets, "project started")
      }
      BuildEvent::ProjectFinished { project, succeeded, .. } => {
        info!(project = %project, succeeded, "project finished")
      }
      BuildEvent::TargetStarted { target, .. } => debug!(target_name = %target, "target started"),
      BuildEvent::TargetSkipped { target, reason, .. } => {
        debug!(target_name = %target, reason = ?reason, "target skipped")
      }
      BuildEvent::TargetFinished { target, code, .. } => debug!(target_name = %target, code = ?code, "target finished"),
      BuildEvent::TaskStarted { task, .. } => debug!(task = %task, "task started"),
      BuildEvent::TaskFinished { task, succeeded, .. } => debug!(task = %task, succeeded, "task finished"),
    }
  }
}

/// Sends events over an unbounded channel. Send failures (receiver gone) are ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
  tx: UnboundedSender<BuildEvent>,
}

impl ChannelSink {
  pub fn new(tx: UnboundedSender<BuildEvent>) -> Self {
    Self { tx }
  }
}

impl EventSink for ChannelSink {
  fn emit(&self, event: &BuildEvent) {
    let _ = self.tx.send(event.clone());
  }
}

/// Records every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
  events: Mutex<Vec<BuildEvent>>,
}

impl MemorySink {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn events(&self) -> Vec<BuildEvent> {
    self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }

  pub fn errors(&self) -> Vec<String> {
    self
      .events()
      .into_iter()
      .filter_map(|e| match e {
        BuildEvent::Error { text, .. } => Some(text),
        _ => None,
      })
      .collect()
  }

  pub fn warnings(&self) -> Vec<String> {
    self
      .events()
      .into_iter()
      .filter_map(|e| match e {
        BuildEvent::Warning { text, .. } => Some(text),
        _ => None,
      })
      .collect()
  }

  pub fn messages(&self) -> Vec<String> {
    self
      .events()
      .into_iter()
      .filter_map(|e| match e {
        BuildEvent::Message { text, .. } => Some(text),
        _ => None,
      })
      .collect()
  }

  /// Names of targets that started executing, in order.
  pub fn started_targets(&self) -> Vec<String> {
    self
      .events()
      .into_iter()
      .filter_map(|e| match e {
        BuildEvent::TargetStarted { target, .. } => Some(target),
        _ => None,
      })
      .collect()
  }

  pub fn started_tasks(&self) -> Vec<String> {
    self
      .events()
      .into_iter()
      .filter_map(|e| match e {
        BuildEvent::TaskStarted { task, .. } => Some(task),
        _ => None,
      })
      .collect()
  }
}

impl EventSink for MemorySink {
  fn emit(&self, event: &BuildEvent) {
    self
      .events
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(event.clone());
  }
}

/// Fans events out to sinks and counts errors per submission.
#[derive(Default)]
pub struct LoggingService {
  sinks: Vec<Arc<dyn EventSink>>,
  errors: DashMap<u32, usize>,
}

impl LoggingService {
  pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
    Self {
      sinks,
      errors: DashMap::new(),
    }
  }

  pub fn log(&self, event: BuildEvent) {
    if let BuildEvent::Error { context, .. } = &event {
      *self.errors.entry(context.submission_id).or_insert(0) += 1;
    }
    for sink in &self.sinks {
      sink.emit(&event);
    }
  }

  pub fn message(&self, context: EventContext, text: impl Into<String>) {
    self.log(BuildEvent::Message {
      context,
      text: text.into(),
    });
  }

  pub fn warning(&self, context: EventContext, text: impl Into<String>) {
    self.log(BuildEvent::Warning {
      context,
      text: text.into(),
    });
  }

  pub fn error(&self, context: EventContext, text: impl Into<String>) {
    self.log(BuildEvent::Error {
      context,
      text: text.into(),
    });
  }

  /// Errors logged so far for a submission.
  pub fn error_count(&self, submission_id: u32) -> usize {
    self.errors.get(&submission_id).map(|c| *c).unwrap_or(0)
  }

  pub fn total_errors(&self) -> usize {
    self.errors.iter().map(|entry| *entry.value()).sum()
  }
}

impl std::fmt::Debug for LoggingService {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LoggingService")
      .field("sinks", &self.sinks.len())
      .field("errors", &self.total_errors())
      .finish()
  }
}
