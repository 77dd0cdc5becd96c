//! Build session lifecycle.
//!
//! A [`BuildSession`] owns the caches, the worker pool and the event sinks for one
//! build. `begin` imports input results caches, `submit` runs top-level requests, and
//! `shutdown` writes the output results cache and reports the overall outcome.

mod params;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::cache::{
  CacheSnapshotError, ConfigCache, ConfigurationId, ResultsCache, build_cache_file, generate_run_id,
  import_cache_file, read_cache_file, write_cache_file,
};
use crate::events::{BuildEvent, EventSink, LoggingService, TracingSink};
use crate::incremental::{DiskTimestamps, TimestampSource};
use crate::project::ProjectLoader;
use crate::scheduler::{BuildError, BuildRequestData, BuildResult, Coordinator, SessionContext};
use crate::task::TaskRegistry;

pub use params::{BuildParameters, ProjectIsolation};

#[derive(Debug, Error)]
pub enum SessionError {
  #[error(transparent)]
  CacheFile(#[from] CacheSnapshotError),

  #[error("failed to load project {path} for the results cache: {message}")]
  ProjectLoad { path: PathBuf, message: String },

  #[error("an output results cache was requested but no project was built")]
  NothingBuilt,
}

/// Pluggable services a session runs with.
pub struct HostServices {
  loader: Arc<dyn ProjectLoader>,
  registry: TaskRegistry,
  timestamps: Arc<dyn TimestampSource>,
  sinks: Vec<Arc<dyn EventSink>>,
}

impl HostServices {
  /// Builtin tasks, disk timestamps and events forwarded to `tracing`.
  pub fn new(loader: Arc<dyn ProjectLoader>) -> Self {
    Self {
      loader,
      registry: TaskRegistry::with_builtins(),
      timestamps: Arc::new(DiskTimestamps),
      sinks: vec![Arc::new(TracingSink)],
    }
  }

  pub fn with_registry(mut self, registry: TaskRegistry) -> Self {
    self.registry = registry;
    self
  }

  pub fn with_timestamps(mut self, timestamps: Arc<dyn TimestampSource>) -> Self {
    self.timestamps = timestamps;
    self
  }

  /// Add a sink next to the default tracing sink.
  pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
    self.sinks.push(sink);
    self
  }
}

/// What `shutdown` reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
  pub succeeded: bool,
  pub errors: usize,
  pub configurations: usize,
  pub output_cache: Option<PathBuf>,
}

#[derive(Debug)]
pub struct BuildSession {
  ctx: Arc<SessionContext>,
  coordinator: Coordinator,
}

impl BuildSession {
  /// Start a session. Input results caches are imported before anything runs.
  pub fn begin(params: BuildParameters, services: HostServices) -> Result<Self, SessionError> {
    let logging = LoggingService::new(services.sinks);
    let ctx = Arc::new(SessionContext::new(
      params,
      services.registry,
      services.loader,
      services.timestamps,
      logging,
    ));

    for path in &ctx.params.input_results_caches {
      let file = read_cache_file(path)?;
      let mapping = import_cache_file(&file, &ctx.configs, &ctx.results)?;
      info!(path = %path.display(), configurations = mapping.len(), "imported results cache");
    }

    ctx.logging.log(BuildEvent::BuildStarted);
    let coordinator = Coordinator::new(ctx.clone());
    Ok(Self { ctx, coordinator })
  }

  /// Build a top-level request. Only a malformed request is an `Err`.
  pub async fn submit(&self, data: BuildRequestData) -> Result<BuildResult, BuildError> {
    self.coordinator.submit(data).await
  }

  /// Ask every running request to stop at its next task boundary.
  pub fn cancel(&self) {
    info!("canceling build");
    self.ctx.cancel.cancel();
  }

  pub fn coordinator(&self) -> &Coordinator {
    &self.coordinator
  }

  pub fn params(&self) -> &BuildParameters {
    &self.ctx.params
  }

  pub fn config_cache(&self) -> &ConfigCache {
    &self.ctx.configs
  }

  pub fn results_cache(&self) -> &ResultsCache {
    &self.ctx.results
  }

  pub fn logging(&self) -> &LoggingService {
    &self.ctx.logging
  }

  /// Write the results of the first top-level configuration to `path`.
  ///
  /// Only targets reachable from what was requested (or the defaults) are kept.
  async fn write_output_cache(&self, path: &Path) -> Result<(), SessionError> {
    let ctx = &self.ctx;
    let builds = ctx.top_level_builds();
    let root: ConfigurationId = builds
      .iter()
      .map(|b| b.configuration)
      .min()
      .ok_or(SessionError::NothingBuilt)?;
    let config = ctx
      .configs
      .get(root)
      .ok_or(CacheSnapshotError::UnknownConfiguration(root))?;
    let loaded = config
      .loaded(ctx.loader.as_ref())
      .await
      .map_err(|e| SessionError::ProjectLoad {
        path: config.identity().project_path().to_path_buf(),
        message: e.to_string(),
      })?;

    let mut allow_list: Vec<String> = Vec::new();
    for build in builds.iter().filter(|b| b.configuration == root) {
      let targets = if build.targets.is_empty() {
        loaded.project().default_targets()
      } else {
        build.targets.clone()
      };
      for target in targets {
        if !allow_list.contains(&target) {
          allow_list.push(target);
        }
      }
    }

    let file = build_cache_file(
      &ctx.configs,
      &ctx.results,
      root,
      &allow_list,
      loaded.project(),
      &generate_run_id(),
    )?;
    write_cache_file(path, &file)?;
    debug!(path = %path.display(), config = %root, "wrote results cache");
    Ok(())
  }

  /// Finish the session.
  pub async fn shutdown(self) -> Result<SessionSummary, SessionError> {
    let written = match self.ctx.params.output_results_cache.clone() {
      Some(path) => self.write_output_cache(&path).await.map(|()| Some(path)),
      None => Ok(None),
    };

    let errors = self.ctx.logging.total_errors();
    let succeeded = written.is_ok() && errors == 0 && !self.ctx.cancel.is_cancelled();
    self.ctx.logging.log(BuildEvent::BuildFinished { succeeded });
    self.ctx.pool.close();

    let output_cache = written?;
    info!(succeeded, errors, "build session finished");
    Ok(SessionSummary {
      succeeded,
      errors,
      configurations: self.ctx.configs.len(),
      output_cache,
    })
  }
}
