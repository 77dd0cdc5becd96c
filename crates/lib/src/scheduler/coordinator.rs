//! Request coordination.
//!
//! Every request, top-level or nested, runs as its own tokio task. A request holds a
//! worker slot while it builds targets and gives it up while it waits on nested
//! requests or on targets another request owns.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{BuildRequestConfiguration, ConfigIdentity};
use crate::consts::IN_PROC_NODE_ID;
use crate::events::{BuildEvent, EventContext};
use crate::session::ProjectIsolation;
use crate::target::{ExecutionEnv, build_targets};

use super::context::SessionContext;
use super::pool::WorkerSlot;
use super::types::{BuildError, BuildRequest, BuildRequestData, BuildResult, RequestId, SubmissionId};

/// What a running request carries: the request, its configuration and its slot.
#[derive(Debug)]
pub struct RequestFrame {
  pub request: BuildRequest,
  pub config: Arc<BuildRequestConfiguration>,
  pub slot: WorkerSlot,
}

/// Entry point for submitting requests into a session.
#[derive(Debug, Clone)]
pub struct Coordinator {
  ctx: Arc<SessionContext>,
}

type BoxedResult = Pin<Box<dyn Future<Output = BuildResult> + Send>>;

impl Coordinator {
  pub fn new(ctx: Arc<SessionContext>) -> Self {
    Self { ctx }
  }

  pub fn context(&self) -> &SessionContext {
    &self.ctx
  }

  fn project_context(&self, submission: SubmissionId) -> EventContext {
    EventContext {
      submission_id: submission.0,
      node_id: IN_PROC_NODE_ID,
      project_context_id: self.ctx.next_project_context_id(),
      ..Default::default()
    }
  }

  /// Submit a top-level request and wait for its result.
  ///
  /// Only a malformed configuration identity is an `Err`; every build failure is
  /// reported in the returned result.
  pub async fn submit(&self, data: BuildRequestData) -> Result<BuildResult, BuildError> {
    let ctx = &self.ctx;
    let mut properties = ctx.params.global_properties.clone();
    properties.extend(data.global_properties);
    let tools_version = data.tools_version.unwrap_or_else(|| ctx.params.tools_version.clone());
    let identity = ConfigIdentity::new(&data.project_path, tools_version, properties)?;

    let config = ctx.configs.get_or_create(identity);
    config.mark_explicitly_loaded();
    ctx.record_top_level(config.id(), data.targets.clone());

    let submission_id = ctx.next_submission_id();
    let request = BuildRequest {
      submission_id,
      request_id: ctx.next_request_id(),
      configuration_id: config.id(),
      targets: data.targets,
      parent: None,
      context: self.project_context(submission_id),
      skip_nonexistent_targets: data.skip_nonexistent_targets,
    };
    let request_id = request.request_id;
    let configuration_id = request.configuration_id;
    info!(submission = %submission_id, config = %configuration_id, project = %config.identity(), "submitting build");

    let handle = tokio::spawn(self.clone().run_request(request, config));
    Ok(match handle.await {
      Ok(result) => result,
      Err(err) => BuildResult::failed(
        submission_id,
        Some(request_id),
        Some(configuration_id),
        BuildError::WorkerPanicked(err.to_string()),
      ),
    })
  }

  /// Results for `targets` (or the cached defaults) if every one is already cached.
  fn cached_result(
    &self,
    submission_id: SubmissionId,
    config: &BuildRequestConfiguration,
    targets: &[String],
  ) -> Option<BuildResult> {
    let ctx = &self.ctx;
    let default_targets = ctx.results.default_targets(config.id());
    let wanted = if targets.is_empty() {
      default_targets.clone()?
    } else {
      targets.to_vec()
    };
    let lookup = ctx.results.get_results(config.id(), &wanted);
    if !lookup.is_complete() {
      return None;
    }
    debug!(config = %config.id(), targets = ?wanted, "satisfied from results cache");
    let overall_success = lookup.found.values().all(|r| !r.is_failure());
    Some(BuildResult {
      submission_id,
      request_id: None,
      configuration_id: Some(config.id()),
      targets: lookup.found,
      default_targets: default_targets.unwrap_or_default(),
      overall_success,
      canceled: false,
      error: None,
    })
  }

  /// Submit requests on behalf of a running task and wait for all of them.
  ///
  /// Children inherit the parent's global properties and tools version unless they
  /// override them. The parent's worker slot is released while it waits.
  pub async fn submit_nested(&self, parent: &RequestFrame, requests: Vec<BuildRequestData>) -> Vec<BuildResult> {
    let ctx = &self.ctx;
    let submission_id = parent.request.submission_id;
    let parent_identity = parent.config.identity();
    let mut results: Vec<Option<BuildResult>> = vec![None; requests.len()];
    let mut pending: Vec<(usize, RequestId, JoinHandle<BuildResult>)> = Vec::new();

    for (index, data) in requests.into_iter().enumerate() {
      let mut properties = parent_identity.global_properties().clone();
      properties.extend(data.global_properties);
      let tools_version = data
        .tools_version
        .unwrap_or_else(|| parent_identity.tools_version().to_string());
      let identity = match ConfigIdentity::new(&data.project_path, tools_version, properties) {
        Ok(identity) => identity,
        Err(err) => {
          let err = BuildError::from(err);
          ctx.logging.error(parent.request.context, err.to_string());
          results[index] = Some(BuildResult::failed(submission_id, None, None, err));
          continue;
        }
      };

      let config = ctx.configs.get_or_create(identity);
      if let Some(cached) = self.cached_result(submission_id, &config, &data.targets) {
        results[index] = Some(cached);
        continue;
      }

      if ctx.params.isolation == ProjectIsolation::On && config.id() != parent.config.id() {
        let err = BuildError::IsolationViolation {
          project: config.identity().project_path().to_path_buf(),
          targets: data.targets,
        };
        ctx.logging.error(parent.request.context, err.to_string());
        results[index] = Some(BuildResult::failed(submission_id, None, Some(config.id()), err));
        continue;
      }

      let request = BuildRequest {
        submission_id,
        request_id: ctx.next_request_id(),
        configuration_id: config.id(),
        targets: data.targets,
        parent: Some(parent.request.request_id),
        context: self.project_context(submission_id),
        skip_nonexistent_targets: data.skip_nonexistent_targets,
      };
      let child = request.request_id;
      // A fresh child cannot close a cycle.
      let _ = ctx.waits.add_wait(parent.request.request_id, child);
      debug!(parent = %parent.request.request_id, request = %child, config = %config.id(), "spawning nested request");
      pending.push((index, child, tokio::spawn(self.clone().run_request(request, config))));
    }

    if !pending.is_empty() {
      let children: Vec<RequestId> = pending.iter().map(|(_, id, _)| *id).collect();
      let joined = parent
        .slot
        .release_then_block_then_reacquire(async move {
          let mut joined = Vec::with_capacity(pending.len());
          for (index, id, handle) in pending {
            joined.push((index, id, handle.await));
          }
          joined
        })
        .await;

      for child in &children {
        ctx.waits.remove_wait(parent.request.request_id, *child);
      }

      match joined {
        Ok(joined) => {
          for (index, id, outcome) in joined {
            results[index] = Some(outcome.unwrap_or_else(|err| {
              BuildResult::failed(submission_id, Some(id), None, BuildError::WorkerPanicked(err.to_string()))
            }));
          }
        }
        Err(_) => warn!(request = %parent.request.request_id, "worker pool closed while waiting on nested requests"),
      }
    }

    results
      .into_iter()
      .map(|r| r.unwrap_or_else(|| BuildResult::failed(submission_id, None, None, BuildError::PoolClosed)))
      .collect()
  }

  /// Run one request to completion. Boxed because nested requests recurse through here.
  fn run_request(self, request: BuildRequest, config: Arc<BuildRequestConfiguration>) -> BoxedResult {
    Box::pin(async move {
      let ctx = self.context();
      let submission_id = request.submission_id;
      let request_id = request.request_id;

      if let Some(mut cached) = self.cached_result(submission_id, &config, &request.targets) {
        cached.request_id = Some(request_id);
        return cached;
      }

      let Ok(slot) = ctx.pool.acquire().await else {
        return BuildResult::failed(submission_id, Some(request_id), Some(config.id()), BuildError::PoolClosed);
      };

      let project = config.identity().project_path().display().to_string();
      let label = if request.targets.is_empty() {
        project.clone()
      } else {
        format!("{} [{}]", project, request.targets.join(";"))
      };
      ctx.waits.register(request_id, label);
      ctx.logging.log(BuildEvent::ProjectStarted {
        context: request.context,
        project: project.clone(),
        targets: request.targets.clone(),
        parent_request: request.parent.map(|p| p.0),
      });

      let context = request.context;
      let frame = Arc::new(RequestFrame { request, config, slot });
      let result = self.build(&frame).await;

      ctx.logging.log(BuildEvent::ProjectFinished {
        context,
        project,
        succeeded: result.overall_success,
      });
      ctx.waits.unregister(request_id);
      result
    })
  }

  async fn build(&self, frame: &Arc<RequestFrame>) -> BuildResult {
    let ctx = self.context();
    let request = &frame.request;
    let config_id = frame.config.id();
    let failed = |err: BuildError| {
      BuildResult::failed(request.submission_id, Some(request.request_id), Some(config_id), err)
    };

    if ctx.cancel.is_cancelled() {
      ctx.logging.error(request.context, "build was canceled");
      return failed(BuildError::Canceled);
    }

    let loaded = match frame.config.loaded(ctx.loader.as_ref()).await {
      Ok(loaded) => loaded,
      Err(err) => {
        let err = BuildError::ProjectLoad {
          path: frame.config.identity().project_path().to_path_buf(),
          message: err.to_string(),
        };
        ctx.logging.error(request.context, err.to_string());
        return failed(err);
      }
    };

    let project = loaded.project();
    let default_targets = project.default_targets();
    ctx.results.set_default_targets(config_id, default_targets.clone());

    let requested = if request.targets.is_empty() {
      default_targets.clone()
    } else {
      request.targets.clone()
    };
    let mut plan: Vec<String> = Vec::new();
    for name in project.instance().initial_targets.iter().chain(&requested) {
      if !plan.contains(name) {
        plan.push(name.clone());
      }
    }
    debug!(request = %request.request_id, plan = ?plan, "building targets");

    let env = ExecutionEnv {
      coordinator: self.clone(),
      frame: frame.clone(),
      project: loaded.clone(),
    };
    let outcome = build_targets(&env, &plan).await;

    let overall_success = outcome.error.is_none()
      && !outcome.canceled
      && plan
        .iter()
        .all(|name| outcome.results.get(name).is_some_and(|r| !r.is_failure()));

    if outcome.canceled {
      ctx.logging.error(request.context, "build was canceled");
    } else if !overall_success && ctx.logging.error_count(request.submission_id.0) == 0 {
      ctx.logging.error(
        request.context,
        format!("build of {} failed", frame.config.identity().project_path().display()),
      );
    }

    let targets: BTreeMap<_, _> = requested
      .iter()
      .filter_map(|name| outcome.results.get(name).map(|r| (name.clone(), r.clone())))
      .collect();
    let error = outcome.error.or(outcome.canceled.then_some(BuildError::Canceled));

    BuildResult {
      submission_id: request.submission_id,
      request_id: Some(request.request_id),
      configuration_id: Some(config_id),
      targets,
      default_targets,
      overall_success,
      canceled: outcome.canceled,
      error,
    }
  }
}
