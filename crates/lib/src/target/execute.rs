//! Single target lifecycle.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::LoadedProject;
use crate::eval::{ConditionError, EvalContext, evaluate_condition, expand_items};
use crate::events::{BuildEvent, EventContext, SkipReason};
use crate::incremental::{DependencyAnalysis, analyze};
use crate::lookup::Lookup;
use crate::project::{ContinueOnError, Item, TargetDef};
use crate::scheduler::{Coordinator, RequestFrame};
use crate::task::{TaskOutcome, execute_task};

use super::types::{TargetResult, WorkUnitAction};

/// What a target execution needs from its request.
#[derive(Clone)]
pub struct ExecutionEnv {
  pub coordinator: Coordinator,
  pub frame: Arc<RequestFrame>,
  pub project: Arc<LoadedProject>,
}

impl std::fmt::Debug for ExecutionEnv {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ExecutionEnv")
      .field("request", &self.frame.request.request_id)
      .field("configuration", &self.frame.config.id())
      .finish()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
  Pending,
  ConditionEvaluated,
  Skipped,
  UpToDateSkipped,
  Executing,
  Completed,
  Failed,
}

impl TargetState {
  fn can_become(self, next: TargetState) -> bool {
    use TargetState::*;
    matches!(
      (self, next),
      (Pending, ConditionEvaluated)
        | (ConditionEvaluated, Skipped)
        | (ConditionEvaluated, UpToDateSkipped)
        | (ConditionEvaluated, Executing)
        | (Executing, Completed)
        | (Executing, Failed)
    )
  }
}

/// How [`TargetExecutor::execute`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
  /// Tasks ran. The result may still be a `Continue` failure.
  Completed(TargetResult),
  /// Outputs were current; no task ran.
  UpToDate(TargetResult),
  /// A task failed under `ErrorAndStop`. Lookup writes were dropped.
  Failed(TargetResult),
  /// The session was cancelled between tasks.
  Canceled,
}

/// Drives one target through its states.
#[derive(Debug)]
pub struct TargetExecutor {
  name: String,
  state: TargetState,
  context: EventContext,
}

impl TargetExecutor {
  pub fn new(name: impl Into<String>, target_id: u32, project_context: EventContext) -> Self {
    Self {
      name: name.into(),
      state: TargetState::Pending,
      context: project_context.with_target(target_id),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn state(&self) -> TargetState {
    self.state
  }

  pub fn context(&self) -> EventContext {
    self.context
  }

  fn transition(&mut self, next: TargetState) {
    debug_assert!(
      self.state.can_become(next),
      "target {} cannot go from {:?} to {:?}",
      self.name,
      self.state,
      next
    );
    self.state = next;
  }

  /// Evaluate the target's condition. Does not change state.
  pub fn check_condition(&self, def: &TargetDef, lookup: &Lookup) -> Result<bool, ConditionError> {
    match &def.condition {
      Some(condition) => evaluate_condition(condition, lookup),
      None => Ok(true),
    }
  }

  /// Mark the target skipped because its condition was false.
  pub fn skip(&mut self) {
    self.transition(TargetState::ConditionEvaluated);
    self.transition(TargetState::Skipped);
  }

  fn outputs(def: &TargetDef, ctx: &dyn EvalContext) -> Vec<Item> {
    def.outputs.as_deref().map(|o| expand_items(o, ctx)).unwrap_or_default()
  }

  /// Run the target's tasks, or skip them if its outputs are current.
  pub async fn execute(&mut self, env: &ExecutionEnv, def: &TargetDef) -> TargetOutcome {
    self.transition(TargetState::ConditionEvaluated);
    let ctx = env.coordinator.context();
    let mut lookup = Lookup::new(env.project.state());

    let up_to_date = match analyze(def, &lookup, ctx.timestamps.as_ref()) {
      analysis @ (DependencyAnalysis::Skip | DependencyAnalysis::SkipNoItems) => {
        let reason = match analysis {
          DependencyAnalysis::SkipNoItems => SkipReason::NoItems,
          _ => SkipReason::UpToDate,
        };
        debug!(target_name = %self.name, reason = ?reason, "skipping target");
        self.transition(TargetState::UpToDateSkipped);
        ctx.logging.log(BuildEvent::TargetSkipped {
          context: self.context,
          target: self.name.clone(),
          reason,
        });
        return TargetOutcome::UpToDate(TargetResult::success(Self::outputs(def, &lookup)));
      }
      DependencyAnalysis::FullBuild { reason } => {
        debug!(target_name = %self.name, reason = %reason, "building target completely");
        BTreeMap::new()
      }
      DependencyAnalysis::IncrementalBuild { changed, up_to_date } => {
        let types: Vec<&String> = changed.keys().collect();
        debug!(target_name = %self.name, changed = ?types, "building target incrementally");
        for (item_type, items) in changed {
          lookup.set_item_mask(&item_type, items);
        }
        up_to_date
      }
    };

    self.transition(TargetState::Executing);
    ctx.logging.log(BuildEvent::TargetStarted {
      context: self.context,
      target: self.name.clone(),
    });

    let mut continued_failure = false;
    for invocation in &def.tasks {
      if ctx.cancel.is_cancelled() {
        info!(target_name = %self.name, "target canceled");
        self.transition(TargetState::Failed);
        return TargetOutcome::Canceled;
      }

      let scope = lookup.enter_scope();
      match execute_task(env, invocation, &mut lookup, self.context, &up_to_date).await {
        TaskOutcome::Succeeded | TaskOutcome::Failed(ContinueOnError::WarnAndContinue) => lookup.merge_scope(scope),
        TaskOutcome::Skipped => lookup.discard_scope(scope),
        TaskOutcome::Failed(ContinueOnError::ErrorAndContinue) => {
          lookup.merge_scope(scope);
          continued_failure = true;
        }
        TaskOutcome::Failed(ContinueOnError::ErrorAndStop) => {
          lookup.discard_scope(scope);
          self.transition(TargetState::Failed);
          return TargetOutcome::Failed(TargetResult::failure(WorkUnitAction::Stop));
        }
      }
    }

    lookup.clear_item_masks();
    let items = Self::outputs(def, &lookup);
    env.project.commit(lookup.into_changes());
    self.transition(TargetState::Completed);

    if continued_failure {
      TargetOutcome::Completed(TargetResult::failure_continue(items))
    } else {
      TargetOutcome::Completed(TargetResult::success(items))
    }
  }
}
