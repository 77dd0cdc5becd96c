//! Target graph walk.
//!
//! Targets are built depth-first with an explicit stack, so deep dependency chains do
//! not grow the async call stack. Each frame moves through fixed phases:
//!
//! ```text
//! Resolve -> Dependencies -> Before -> Execute -> [OnError] -> After -> Finish
//! ```
//!
//! A frame owns the in-flight claim for its target from Resolve until its result is
//! recorded. A target already on the stack is a cycle. A target claimed by another
//! request is waited for, with the worker slot given up meanwhile; a wait that would
//! close a cycle between requests is reported instead.

use std::collections::BTreeMap;

use tracing::{debug, trace, warn};

use crate::events::{BuildEvent, SkipReason};
use crate::lookup::Lookup;
use crate::project::TargetDef;
use crate::scheduler::{BuildError, Claim, ClaimGuard, wait_for_release};

use super::execute::{ExecutionEnv, TargetExecutor, TargetOutcome};
use super::types::{TargetResult, WorkUnitAction};

/// Results of the requested targets, plus why the walk stopped early, if it did.
#[derive(Debug, Default)]
pub struct GraphOutcome {
  pub results: BTreeMap<String, TargetResult>,
  pub error: Option<BuildError>,
  pub canceled: bool,
}

/// Why a target is on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
  Requested,
  DependsOn,
  Before,
  After,
  OnError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
  Resolve,
  Dependencies,
  Before,
  Execute,
  OnError,
  After,
  Finish,
}

#[derive(Debug)]
struct Frame {
  name: String,
  relation: Relation,
  phase: Phase,
  executor: Option<TargetExecutor>,
  claim: Option<ClaimGuard>,
  result: Option<TargetResult>,
  /// Targets depending on this one must not run.
  halted: bool,
  cursor: usize,
  recorded: bool,
  skipped_by_condition: bool,
}

impl Frame {
  fn new(name: impl Into<String>, relation: Relation) -> Self {
    Self {
      name: name.into(),
      relation,
      phase: Phase::Resolve,
      executor: None,
      claim: None,
      result: None,
      halted: false,
      cursor: 0,
      recorded: false,
      skipped_by_condition: false,
    }
  }

  fn enter(&mut self, phase: Phase) {
    trace!(target_name = %self.name, phase = ?phase, "target phase");
    self.phase = phase;
    self.cursor = 0;
  }

  /// Fail without running tasks because something this target needs failed.
  fn fail_stop(&mut self) {
    self.result = Some(TargetResult::failure(WorkUnitAction::Stop));
    self.halted = true;
    self.enter(Phase::Finish);
  }
}

#[derive(Debug)]
struct Delivery {
  result: TargetResult,
  halted: bool,
}

impl Delivery {
  fn of(result: TargetResult) -> Self {
    let halted = result.should_stop();
    Self { result, halted }
  }
}

enum Step {
  Continue,
  Push(Frame),
  Pop(Delivery),
}

enum Abort {
  Error(BuildError),
  Canceled,
}

struct Walker<'a> {
  env: &'a ExecutionEnv,
  stack: Vec<Frame>,
}

impl<'a> Walker<'a> {
  fn new(env: &'a ExecutionEnv) -> Self {
    Self {
      env,
      stack: Vec::new(),
    }
  }

  fn definition(&self, name: &str) -> Option<&'a TargetDef> {
    self.env.project.project().target(name)
  }

  /// Log a request-level error and turn it into an abort.
  fn fail(&self, err: BuildError) -> Abort {
    self
      .env
      .coordinator
      .context()
      .logging
      .error(self.env.frame.request.context, err.to_string());
    Abort::Error(err)
  }

  /// Build one requested target and everything it pulls in.
  async fn run(&mut self, name: &str) -> Result<Delivery, Abort> {
    self.stack.push(Frame::new(name, Relation::Requested));
    loop {
      let Some(phase) = self.stack.last().map(|f| f.phase) else {
        return Ok(Delivery::of(TargetResult::failure(WorkUnitAction::Stop)));
      };
      let step = match self.advance(phase).await {
        Ok(step) => step,
        Err(abort) => {
          self.abandon(&abort);
          return Err(abort);
        }
      };
      match step {
        Step::Continue => {}
        Step::Push(frame) => self.stack.push(frame),
        Step::Pop(delivery) => {
          let Some(finished) = self.stack.pop() else {
            return Ok(delivery);
          };
          let Some(parent) = self.stack.last_mut() else {
            return Ok(delivery);
          };
          match finished.relation {
            Relation::DependsOn | Relation::Before if delivery.halted => {
              debug!(target_name = %parent.name, failed = %finished.name, "prerequisite failed");
              parent.fail_stop();
            }
            Relation::After if delivery.halted => {
              parent.halted = true;
              parent.enter(Phase::Finish);
            }
            _ => {}
          }
        }
      }
    }
  }

  async fn advance(&mut self, phase: Phase) -> Result<Step, Abort> {
    let env = self.env;
    match phase {
      Phase::Resolve => self.resolve().await,

      Phase::Dependencies | Phase::Before | Phase::After | Phase::OnError => {
        let Some(top) = self.stack.last_mut() else {
          return Ok(Step::Continue);
        };
        let project = env.project.project();
        let (children, relation): (&[String], Relation) = match phase {
          Phase::Dependencies => (
            project.target(&top.name).map(|d| d.depends_on.as_slice()).unwrap_or_default(),
            Relation::DependsOn,
          ),
          Phase::Before => (project.runs_before(&top.name), Relation::Before),
          Phase::After => (project.runs_after(&top.name), Relation::After),
          _ => (
            project.target(&top.name).map(|d| d.on_error.as_slice()).unwrap_or_default(),
            Relation::OnError,
          ),
        };

        if let Some(child) = children.get(top.cursor) {
          top.cursor += 1;
          return Ok(Step::Push(Frame::new(child.clone(), relation)));
        }

        match phase {
          Phase::Dependencies => top.enter(Phase::Before),
          Phase::Before => top.enter(Phase::Execute),
          Phase::OnError => {
            record(env, top);
            top.enter(Phase::Finish);
          }
          _ => top.enter(Phase::Finish),
        }
        Ok(Step::Continue)
      }

      Phase::Execute => self.execute().await,

      Phase::Finish => {
        let Some(top) = self.stack.last_mut() else {
          return Ok(Step::Continue);
        };
        if !top.recorded {
          record(env, top);
        }
        let result = top
          .result
          .clone()
          .unwrap_or_else(|| TargetResult::failure(WorkUnitAction::Stop));
        Ok(Step::Pop(Delivery {
          result,
          halted: top.halted,
        }))
      }
    }
  }

  async fn resolve(&mut self) -> Result<Step, Abort> {
    let env = self.env;
    let ctx = env.coordinator.context();
    let config = env.frame.config.id();
    let me = env.frame.request.request_id;
    let depth = self.stack.len() - 1;
    let name = self.stack[depth].name.clone();
    let relation = self.stack[depth].relation;

    let claim = loop {
      if ctx.cancel.is_cancelled() {
        return Err(Abort::Canceled);
      }
      if let Some(cached) = ctx.results.target_result(config, &name) {
        trace!(target_name = %name, "target result cached");
        return Ok(Step::Pop(Delivery::of(cached)));
      }

      if self.definition(&name).is_none() {
        return match relation {
          Relation::Requested if env.frame.request.skip_nonexistent_targets => {
            debug!(target_name = %name, "skipping nonexistent target");
            Ok(Step::Pop(Delivery::of(TargetResult::skipped())))
          }
          Relation::Before | Relation::After | Relation::OnError => {
            warn!(target_name = %name, "ignoring nonexistent target");
            Ok(Step::Pop(Delivery::of(TargetResult::skipped())))
          }
          _ => Err(self.fail(BuildError::TargetNotFound {
            target: name,
            project: env.frame.config.identity().project_path().to_path_buf(),
          })),
        };
      }

      if let Some(first) = self.stack[..depth].iter().position(|f| f.name == name) {
        let mut chain: Vec<String> = self.stack[first..depth].iter().map(|f| f.name.clone()).collect();
        chain.push(name);
        return Err(self.fail(BuildError::CircularDependency { chain }));
      }

      match ctx.inflight.claim(config, &name, me) {
        Claim::Owned(guard) => {
          // Someone may have finished it between the cache check and the claim.
          if let Some(cached) = ctx.results.target_result(config, &name) {
            guard.complete();
            return Ok(Step::Pop(Delivery::of(cached)));
          }
          break guard;
        }
        Claim::Deadlock { owner, chain } => {
          let chain = if owner == me {
            vec![name.clone(), name]
          } else {
            ctx.waits.describe(&chain)
          };
          return Err(self.fail(BuildError::CircularDependency { chain }));
        }
        Claim::Busy { owner, done } => {
          // The wait edge is dropped by the owner when it releases the claim.
          debug!(target_name = %name, owner = %owner, "waiting for target built by another request");
          let waited = env
            .frame
            .slot
            .release_then_block_then_reacquire(wait_for_release(done))
            .await;
          if waited.is_err() {
            return Err(Abort::Error(BuildError::PoolClosed));
          }
        }
      }
    };

    let Some(def) = self.definition(&name) else {
      return Err(Abort::Error(BuildError::TargetNotFound {
        target: name,
        project: env.frame.config.identity().project_path().to_path_buf(),
      }));
    };
    let top = &mut self.stack[depth];
    top.claim = Some(claim);
    let executor = top
      .executor
      .insert(TargetExecutor::new(name.as_str(), ctx.next_target_id(), env.frame.request.context));

    let lookup = Lookup::new(env.project.state());
    match executor.check_condition(def, &lookup) {
      Ok(true) => top.enter(Phase::Dependencies),
      Ok(false) => {
        debug!(target_name = %name, "target condition is false");
        top.skipped_by_condition = true;
        top.enter(Phase::Before);
      }
      Err(err) => {
        ctx.logging.error(executor.context(), format!("target \"{}\": {}", name, err));
        top.fail_stop();
      }
    }
    Ok(Step::Continue)
  }

  async fn execute(&mut self) -> Result<Step, Abort> {
    let env = self.env;
    let ctx = env.coordinator.context();
    let depth = self.stack.len() - 1;
    let name = self.stack[depth].name.clone();
    let Some(def) = self.definition(&name) else {
      return Err(Abort::Error(BuildError::TargetNotFound {
        target: name,
        project: env.frame.config.identity().project_path().to_path_buf(),
      }));
    };

    let top = &mut self.stack[depth];
    let project_context = env.frame.request.context;
    let executor = top
      .executor
      .get_or_insert_with(|| TargetExecutor::new(name.as_str(), ctx.next_target_id(), project_context));

    if top.skipped_by_condition {
      executor.skip();
      ctx.logging.log(BuildEvent::TargetSkipped {
        context: executor.context(),
        target: name,
        reason: SkipReason::ConditionFalse,
      });
      top.result = Some(TargetResult::skipped());
      record(env, top);
      top.enter(Phase::After);
      return Ok(Step::Continue);
    }

    match executor.execute(env, def).await {
      TargetOutcome::Completed(result) | TargetOutcome::UpToDate(result) => {
        top.result = Some(result);
        record(env, top);
        top.enter(Phase::After);
      }
      TargetOutcome::Failed(result) => {
        top.result = Some(result);
        top.halted = true;
        top.enter(Phase::OnError);
      }
      TargetOutcome::Canceled => return Err(Abort::Canceled),
    }
    Ok(Step::Continue)
  }

  /// Unwind the stack after an abort.
  ///
  /// On error every claimed, unrecorded target is recorded as a stopping failure so
  /// waiters see a result. On cancellation claims are just released.
  fn abandon(&mut self, abort: &Abort) {
    let env = self.env;
    while let Some(mut frame) = self.stack.pop() {
      if matches!(abort, Abort::Error(_)) && frame.claim.is_some() && !frame.recorded {
        frame.result = Some(TargetResult::failure(WorkUnitAction::Stop));
        record(env, &mut frame);
      }
    }
  }
}

/// Store a frame's result, announce it and release the claim.
fn record(env: &ExecutionEnv, frame: &mut Frame) {
  let ctx = env.coordinator.context();
  let result = frame
    .result
    .get_or_insert_with(|| TargetResult::failure(WorkUnitAction::Stop))
    .clone();
  let code = result.code;
  ctx.results.add_result(env.frame.config.id(), &frame.name, result);

  let context = frame
    .executor
    .as_ref()
    .map(TargetExecutor::context)
    .unwrap_or(env.frame.request.context);
  ctx.logging.log(BuildEvent::TargetFinished {
    context,
    target: frame.name.clone(),
    code,
  });

  if let Some(claim) = frame.claim.take() {
    claim.complete();
  }
  frame.recorded = true;
}

/// Build `plan` in order for the request in `env`.
///
/// Stops after the first stopping failure unless the session continues on failure.
pub async fn build_targets(env: &ExecutionEnv, plan: &[String]) -> GraphOutcome {
  let continue_on_failure = env.coordinator.context().params.continue_on_failure;
  let mut walker = Walker::new(env);
  let mut outcome = GraphOutcome::default();

  for name in plan {
    match walker.run(name).await {
      Ok(delivery) => {
        let halted = delivery.halted;
        outcome.results.insert(name.clone(), delivery.result);
        if halted && !continue_on_failure {
          debug!(target_name = %name, "stopping after failed target");
          break;
        }
      }
      Err(Abort::Error(err)) => {
        outcome.error = Some(err);
        break;
      }
      Err(Abort::Canceled) => {
        outcome.canceled = true;
        break;
      }
    }
  }
  outcome
}
