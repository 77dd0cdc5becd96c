//! Results cache files across sessions.

use std::sync::Arc;

use kiln_lib::cache::read_cache_file;
use kiln_lib::events::BuildEvent;
use kiln_lib::project::{InMemoryProjectLoader, ProjectInstance, TargetDef, TaskInvocation};
use kiln_lib::scheduler::BuildRequestData;
use kiln_lib::session::{BuildParameters, BuildSession, HostServices, ProjectIsolation, SessionError};
use kiln_lib::target::TargetResultCode;
use tempfile::TempDir;

use crate::common::{Harness, error, record};

fn library() -> ProjectInstance {
  ProjectInstance::new("/repo/lib.json")
    .with_target(
      TargetDef::new("Build")
        .depends_on(["Compile"])
        .with_outputs("lib.dll")
        .with_task(record("lib"))
        .with_task(TaskInvocation::new("CallTarget").with_param("Targets", "Docs")),
    )
    .with_target(TargetDef::new("Compile").with_task(record("lib.compile")))
    .with_target(TargetDef::new("Docs").with_task(record("lib.docs")))
    .with_default_targets(["Build"])
}

fn application() -> ProjectInstance {
  ProjectInstance::new("/repo/app.json").with_target(
    TargetDef::new("Build")
      .with_outputs("@(Refs);app.exe")
      .with_task(
        TaskInvocation::new("BuildProject")
          .with_param("Projects", "lib.json")
          .output_items("TargetOutputs", "Refs"),
      )
      .with_task(record("app")),
  )
}

#[tokio::test]
async fn output_cache_keeps_targets_reachable_from_the_request() {
  let temp = TempDir::new().unwrap();
  let cache = temp.path().join("lib.cache.json");
  let h = Harness::builder()
    .params(|p| p.output_results_cache = Some(cache.clone()))
    .project(library())
    .start();

  let result = h.session.submit(BuildRequestData::new("/repo/lib.json")).await.unwrap();
  assert!(result.is_success(), "{:?}", h.events.errors());
  assert_eq!(h.journal.count("lib.docs"), 1);

  let summary = h.session.shutdown().await.unwrap();
  assert!(summary.succeeded);
  assert_eq!(summary.errors, 0);
  assert_eq!(summary.output_cache.as_deref(), Some(cache.as_path()));

  let file = read_cache_file(&cache).unwrap();
  assert_eq!(file.configurations.len(), 1);
  assert_eq!(file.configurations[0].project_path, std::path::PathBuf::from("/repo/lib.json"));
  let results = &file.results[0];
  assert_eq!(results.default_targets, vec!["Build"]);
  let names: Vec<&str> = results.targets.keys().map(String::as_str).collect();
  // Docs was only reached through CallTarget.
  assert_eq!(names, vec!["Build", "Compile"]);
  assert!(
    h.events
      .events()
      .iter()
      .any(|e| matches!(e, BuildEvent::BuildFinished { succeeded: true }))
  );
}

#[tokio::test]
async fn isolated_build_uses_results_from_input_cache() {
  let temp = TempDir::new().unwrap();
  let cache = temp.path().join("lib.cache.json");

  let first = Harness::builder()
    .params(|p| p.output_results_cache = Some(cache.clone()))
    .project(library())
    .start();
  let result = first.session.submit(BuildRequestData::new("/repo/lib.json")).await.unwrap();
  assert!(result.is_success());
  first.session.shutdown().await.unwrap();

  let second = Harness::builder()
    .params(|p| {
      p.input_results_caches = vec![cache.clone()];
      p.isolation = ProjectIsolation::On;
    })
    .project(application())
    .start();
  let result = second
    .session
    .submit(BuildRequestData::new("/repo/app.json").with_targets(["Build"]))
    .await
    .unwrap();

  assert!(result.is_success(), "{:?}", second.events.errors());
  let specs: Vec<&str> = result.targets["Build"].items.iter().map(|i| i.spec.as_str()).collect();
  assert_eq!(specs, vec!["lib.dll", "app.exe"]);
  assert_eq!(second.journal.entries(), vec!["app"]);
  // The library was never loaded in the second session.
  assert_eq!(second.loader.load_count(), 1);
}

#[tokio::test]
async fn failed_build_is_reported_by_shutdown() {
  let h = Harness::builder()
    .project(ProjectInstance::new("/repo/a.json").with_target(TargetDef::new("Build").with_task(error("nope"))))
    .start();

  let result = h
    .session
    .submit(BuildRequestData::new("/repo/a.json").with_targets(["Build"]))
    .await
    .unwrap();
  assert_eq!(result.targets["Build"].code, TargetResultCode::Failure);

  let summary = h.session.shutdown().await.unwrap();
  assert!(!summary.succeeded);
  assert_eq!(summary.errors, 1);
  assert_eq!(summary.configurations, 1);
  assert!(summary.output_cache.is_none());
}

#[tokio::test]
async fn output_cache_without_a_build_is_an_error() {
  let temp = TempDir::new().unwrap();
  let h = Harness::builder()
    .params(|p| p.output_results_cache = Some(temp.path().join("out.json")))
    .start();

  let err = h.session.shutdown().await.unwrap_err();

  assert!(matches!(err, SessionError::NothingBuilt));
  assert!(!temp.path().join("out.json").exists());
}

#[test]
fn corrupt_input_cache_fails_session_start() {
  let temp = TempDir::new().unwrap();
  let cache = temp.path().join("bad.json");
  std::fs::write(&cache, "{ not json").unwrap();

  let params = BuildParameters {
    input_results_caches: vec![cache],
    ..Default::default()
  };
  let services = HostServices::new(Arc::new(InMemoryProjectLoader::new()));

  let err = BuildSession::begin(params, services).unwrap_err();
  assert!(matches!(err, SessionError::CacheFile(_)));
}
