//! Implementation of the `kiln build` command.
//!
//! Loads a JSON project file, builds the requested targets in a fresh session and
//! prints per-target results.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use kiln_lib::events::{BuildEvent, EventSink, MemorySink};
use kiln_lib::project::JsonProjectLoader;
use kiln_lib::scheduler::{BuildRequestData, BuildResult};
use kiln_lib::session::{BuildParameters, BuildSession, HostServices, ProjectIsolation, SessionSummary};
use kiln_lib::target::TargetResultCode;
use owo_colors::{OwoColorize, Stream};
use tracing::debug;

use crate::output::{
  OutputFormat, format_duration, plural, print_error, print_failure, print_info, print_json, print_skipped,
  print_success, print_stat, print_warning, symbols,
};

pub struct BuildArgs {
  pub project: PathBuf,
  pub targets: Vec<String>,
  pub properties: Vec<String>,
  pub max_workers: Option<usize>,
  pub continue_on_failure: bool,
  pub isolate: bool,
  pub input_caches: Vec<PathBuf>,
  pub output_cache: Option<PathBuf>,
  pub timeout: Option<Duration>,
  pub output: OutputFormat,
  pub verbose: bool,
}

/// Prints build messages as they happen.
struct ConsoleSink {
  verbose: bool,
}

impl EventSink for ConsoleSink {
  fn emit(&self, event: &BuildEvent) {
    match event {
      BuildEvent::Error { text, .. } => print_error(text),
      BuildEvent::Warning { text, .. } => print_warning(text),
      BuildEvent::Message { text, .. } => print_info(text),
      BuildEvent::TargetStarted { target, .. } if self.verbose => {
        println!(
          "  {} {}",
          symbols::ARROW.if_supports_color(Stream::Stdout, |s| s.dimmed()),
          target
        );
      }
      _ => {}
    }
  }
}

fn parse_properties(entries: &[String]) -> Result<BTreeMap<String, String>> {
  let mut properties = BTreeMap::new();
  for entry in entries {
    let Some((key, value)) = entry.split_once('=') else {
      bail!("Invalid property '{}': expected KEY=VALUE", entry);
    };
    if key.trim().is_empty() {
      bail!("Invalid property '{}': empty name", entry);
    }
    properties.insert(key.trim().to_string(), value.to_string());
  }
  Ok(properties)
}

fn parameters(args: &BuildArgs) -> Result<BuildParameters> {
  let mut params = BuildParameters::from_env();
  if let Some(workers) = args.max_workers {
    if workers == 0 {
      bail!("--max-workers must be at least 1");
    }
    params.max_workers = workers;
  }
  params.continue_on_failure |= args.continue_on_failure;
  if args.isolate {
    params.isolation = ProjectIsolation::On;
  }
  params.input_results_caches = args.input_caches.clone();
  params.output_results_cache = args.output_cache.clone();
  Ok(params)
}

pub fn cmd_build(args: BuildArgs) -> Result<()> {
  let project = dunce::canonicalize(&args.project)
    .with_context(|| format!("Project file not found: {}", args.project.display()))?;
  let properties = parse_properties(&args.properties)?;
  let params = parameters(&args)?;
  debug!(project = %project.display(), workers = params.max_workers, "starting build");

  let memory = Arc::new(MemorySink::new());
  let mut services = HostServices::new(Arc::new(JsonProjectLoader::new())).with_sink(memory.clone());
  if !args.output.is_json() {
    services = services.with_sink(Arc::new(ConsoleSink { verbose: args.verbose }));
  }

  let data = BuildRequestData::new(&project)
    .with_properties(properties)
    .with_targets(args.targets.clone());

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let started = Instant::now();
  let (result, summary) = rt.block_on(async {
    let session = BuildSession::begin(params, services).context("Failed to start build session")?;

    let result = {
      let submit = session.submit(data);
      tokio::pin!(submit);
      match args.timeout {
        Some(limit) => tokio::select! {
          result = submit.as_mut() => result,
          _ = tokio::time::sleep(limit) => {
            session.cancel();
            submit.as_mut().await
          }
        },
        None => submit.as_mut().await,
      }
    }
    .context("Invalid build request")?;

    let summary = session.shutdown().await.context("Failed to finish build session")?;
    Ok::<_, anyhow::Error>((result, summary))
  })?;
  let elapsed = started.elapsed();

  if args.output.is_json() {
    print_json(&json_report(&project, &result, &summary, &memory, elapsed))?;
  } else {
    print_report(&result, &summary, elapsed);
  }

  if !result.is_success() || !summary.succeeded {
    bail!("Build failed");
  }
  Ok(())
}

fn print_report(result: &BuildResult, summary: &SessionSummary, elapsed: Duration) {
  println!();
  for (name, target) in &result.targets {
    let detail = format!("{} ({})", name, plural(target.items.len(), "item"));
    match target.code {
      TargetResultCode::Success => print_success(&detail),
      TargetResultCode::Failure => print_failure(&detail),
      TargetResultCode::Skipped => print_skipped(&detail),
    }
  }
  println!();
  if result.canceled {
    print_failure(&format!("Build canceled after {}", format_duration(elapsed)));
  } else if result.is_success() && summary.succeeded {
    print_success(&format!("Build succeeded in {}", format_duration(elapsed)));
  } else {
    print_failure(&format!("Build failed in {}", format_duration(elapsed)));
  }
  print_stat("Errors", &summary.errors.to_string());
  print_stat("Configurations", &summary.configurations.to_string());
  if let Some(path) = &summary.output_cache {
    print_stat("Results cache", &path.display().to_string());
  }
}

fn json_report(
  project: &std::path::Path,
  result: &BuildResult,
  summary: &SessionSummary,
  memory: &MemorySink,
  elapsed: Duration,
) -> serde_json::Value {
  let targets: serde_json::Map<String, serde_json::Value> = result
    .targets
    .iter()
    .map(|(name, target)| {
      let items: Vec<&str> = target.items.iter().map(|i| i.spec.as_str()).collect();
      (name.clone(), serde_json::json!({ "code": target.code, "items": items }))
    })
    .collect();
  serde_json::json!({
    "project": project.display().to_string(),
    "success": result.is_success() && summary.succeeded,
    "canceled": result.canceled,
    "targets": targets,
    "errors": memory.errors(),
    "warnings": memory.warnings(),
    "configurations": summary.configurations,
    "output_cache": summary.output_cache.as_ref().map(|p| p.display().to_string()),
    "duration_ms": elapsed.as_millis() as u64,
  })
}
