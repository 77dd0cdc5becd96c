//! Requests across projects: nested builds, worker slots, cycles and cancellation.

use std::time::Duration;

use kiln_lib::project::{Item, ProjectInstance, TargetDef, TaskInvocation};
use kiln_lib::scheduler::{BuildError, BuildRequestData, BuildResult};
use kiln_lib::session::ProjectIsolation;
use kiln_lib::target::TargetResultCode;
use kiln_lib::task::SOURCE_PROJECT_METADATA;
use tokio::time::timeout;

use crate::common::{BUILD_TIMEOUT, Harness, record};

fn build_projects(projects: &str) -> TaskInvocation {
  TaskInvocation::new("BuildProject")
    .with_param("Projects", projects)
    .with_param("Targets", "Build")
    .output_items("TargetOutputs", "Built")
}

fn referencing(path: &str, name: &str, references: &str) -> ProjectInstance {
  ProjectInstance::new(path).with_target(
    TargetDef::new("Build")
      .with_outputs(format!("@(Built);{}.dll", name))
      .with_task(build_projects(references))
      .with_task(record(name)),
  )
}

fn leaf(path: &str, name: &str) -> ProjectInstance {
  ProjectInstance::new(path).with_target(
    TargetDef::new("Build")
      .with_outputs(format!("{}.dll", name))
      .with_task(record(name)),
  )
}

#[tokio::test]
async fn nested_projects_build_once_and_return_outputs_in_order() {
  let h = Harness::builder()
    .project(referencing("/repo/app/app.json", "app", "../core/core.json;../ui/ui.json"))
    .project(referencing("/repo/ui/ui.json", "ui", "../core/core.json"))
    .project(leaf("/repo/core/core.json", "core"))
    .start();

  let result = timeout(
    BUILD_TIMEOUT,
    h.session
      .submit(BuildRequestData::new("/repo/app/app.json").with_targets(["Build"])),
  )
  .await
  .unwrap()
  .unwrap();

  assert!(result.is_success(), "{:?}", h.events.errors());
  let items = &result.targets["Build"].items;
  let specs: Vec<&str> = items.iter().map(|i| i.spec.as_str()).collect();
  assert_eq!(specs, vec!["core.dll", "core.dll", "ui.dll", "app.dll"]);
  assert_eq!(
    items[0].metadata(SOURCE_PROJECT_METADATA).as_deref(),
    Some("../core/core.json")
  );
  assert_eq!(h.journal.count("core"), 1);
  assert_eq!(h.loader.load_count(), 3);
  assert_eq!(h.session.config_cache().len(), 3);
}

#[tokio::test]
async fn additional_properties_create_distinct_configurations() {
  let h = Harness::builder()
    .project(
      ProjectInstance::new("/repo/app.json")
        .with_item(
          "Ref",
          Item::new("lib.json").with_metadata("AdditionalProperties", "Flavor=Debug"),
        )
        .with_item(
          "Ref",
          Item::new("lib.json").with_metadata("AdditionalProperties", "Flavor=Release"),
        )
        .with_target(
          TargetDef::new("Build")
            .with_outputs("@(Built)")
            .with_task(build_projects("@(Ref)")),
        ),
    )
    .project(
      ProjectInstance::new("/repo/lib.json").with_target(
        TargetDef::new("Build")
          .with_outputs("lib.$(Flavor).dll")
          .with_task(record("lib $(Flavor)")),
      ),
    )
    .start();

  let result = timeout(BUILD_TIMEOUT, h.session.submit(BuildRequestData::new("/repo/app.json").with_targets(["Build"])))
    .await
    .unwrap()
    .unwrap();

  assert!(result.is_success(), "{:?}", h.events.errors());
  assert_eq!(
    result.targets["Build"].items.iter().map(|i| i.spec.as_str()).collect::<Vec<_>>(),
    vec!["lib.Debug.dll", "lib.Release.dll"]
  );
  assert_eq!(h.journal.count("lib Debug"), 1);
  assert_eq!(h.journal.count("lib Release"), 1);
  assert_eq!(h.session.config_cache().len(), 3);
}

#[tokio::test]
async fn single_worker_yields_its_slot_to_nested_requests() {
  let h = Harness::builder()
    .params(|p| p.max_workers = 1)
    .project(referencing("/repo/a.json", "a", "b.json"))
    .project(referencing("/repo/b.json", "b", "c.json"))
    .project(leaf("/repo/c.json", "c"))
    .start();

  let result = timeout(BUILD_TIMEOUT, h.session.submit(BuildRequestData::new("/repo/a.json").with_targets(["Build"])))
    .await
    .expect("nested build must not deadlock with one worker")
    .unwrap();

  assert!(result.is_success(), "{:?}", h.events.errors());
  assert_eq!(h.journal.entries(), vec!["c", "b", "a"]);
}

#[tokio::test]
async fn cycle_between_projects_is_reported_not_deadlocked() {
  let h = Harness::builder()
    .project(referencing("/repo/a.json", "a", "b.json"))
    .project(referencing("/repo/b.json", "b", "a.json"))
    .start();

  let result = timeout(BUILD_TIMEOUT, h.session.submit(BuildRequestData::new("/repo/a.json").with_targets(["Build"])))
    .await
    .expect("cross-project cycle must not deadlock")
    .unwrap();

  assert!(!result.is_success());
  assert!(
    h.events.errors().iter().any(|e| e.starts_with("circular dependency")),
    "{:?}",
    h.events.errors()
  );
  assert!(h.journal.entries().is_empty());
}

#[tokio::test]
async fn concurrent_submissions_share_targets() {
  let h = Harness::builder()
    .project(
      ProjectInstance::new("/repo/a.json").with_target(
        TargetDef::new("Build")
          .with_task(TaskInvocation::new("Sleep").with_param("Millis", "50"))
          .with_task(record("a")),
      ),
    )
    .start();

  let data = || BuildRequestData::new("/repo/a.json").with_targets(["Build"]);
  let (first, second) = timeout(BUILD_TIMEOUT, async {
    tokio::join!(h.session.submit(data()), h.session.submit(data()))
  })
  .await
  .unwrap();

  assert!(first.unwrap().is_success());
  assert!(second.unwrap().is_success());
  assert_eq!(h.journal.count("a"), 1);
}

fn sleep(millis: &str) -> TaskInvocation {
  TaskInvocation::new("Sleep").with_param("Millis", millis)
}

async fn submit_both(h: &Harness, first: &str, second: &str) -> (BuildResult, BuildResult) {
  let (a, b) = timeout(BUILD_TIMEOUT, async {
    tokio::join!(
      h.session.submit(BuildRequestData::new("/repo/a.json").with_targets([first])),
      h.session.submit(BuildRequestData::new("/repo/a.json").with_targets([second])),
    )
  })
  .await
  .expect("overlapping requests must not deadlock");
  (a.unwrap(), b.unwrap())
}

#[tokio::test]
async fn overlapping_requests_wait_without_false_cycles() {
  let h = Harness::builder()
    .project(
      ProjectInstance::new("/repo/a.json")
        .with_target(TargetDef::new("A").depends_on(["C", "D"]).with_task(record("A")))
        .with_target(TargetDef::new("D").depends_on(["C"]).with_task(record("D")))
        .with_target(TargetDef::new("C").with_task(sleep("200")).with_task(record("C"))),
    )
    .start();

  let (a, d) = submit_both(&h, "A", "D").await;

  assert!(a.is_success(), "{:?}", h.events.errors());
  assert!(d.is_success(), "{:?}", h.events.errors());
  assert!(h.events.errors().is_empty(), "{:?}", h.events.errors());
  for name in ["C", "D", "A"] {
    assert_eq!(h.journal.count(name), 1, "{} ran {:?}", name, h.journal.entries());
  }
}

#[tokio::test]
async fn concurrent_diamonds_share_every_target() {
  let h = Harness::builder()
    .project(
      ProjectInstance::new("/repo/a.json")
        .with_target(TargetDef::new("Top").depends_on(["Left", "Right"]).with_task(record("Top")))
        .with_target(TargetDef::new("Pack").depends_on(["Right", "Left"]).with_task(record("Pack")))
        .with_target(TargetDef::new("Left").depends_on(["Base"]).with_task(sleep("50")).with_task(record("Left")))
        .with_target(TargetDef::new("Right").depends_on(["Base"]).with_task(sleep("50")).with_task(record("Right")))
        .with_target(TargetDef::new("Base").with_task(sleep("100")).with_task(record("Base"))),
    )
    .start();

  let (top, pack) = submit_both(&h, "Top", "Pack").await;

  assert!(top.is_success(), "{:?}", h.events.errors());
  assert!(pack.is_success(), "{:?}", h.events.errors());
  for name in ["Base", "Left", "Right", "Top", "Pack"] {
    assert_eq!(h.journal.count(name), 1, "{} ran {:?}", name, h.journal.entries());
  }
}

#[tokio::test]
async fn silent_failure_is_reported_while_a_sibling_logs_errors() {
  let h = Harness::builder()
    .project(
      ProjectInstance::new("/repo/app.json")
        .with_target(TargetDef::new("Build").with_task(build_projects("loud.json;quiet.json"))),
    )
    .project(
      ProjectInstance::new("/repo/loud.json").with_target(
        TargetDef::new("Build")
          .with_task(sleep("20"))
          .with_task(TaskInvocation::new("Error").with_param("Text", "loud failure")),
      ),
    )
    .project(
      ProjectInstance::new("/repo/quiet.json")
        .with_target(TargetDef::new("Build").with_task(TaskInvocation::new("Fail").with_param("Millis", "150"))),
    )
    .start();

  let result = timeout(
    BUILD_TIMEOUT,
    h.session.submit(BuildRequestData::new("/repo/app.json").with_targets(["Build"])),
  )
  .await
  .unwrap()
  .unwrap();

  assert!(!result.is_success());
  let errors = h.events.errors();
  assert!(errors.contains(&"loud failure".to_string()), "{:?}", errors);
  assert!(
    errors.contains(&"task \"Fail\" returned false but did not log an error".to_string()),
    "{:?}",
    errors
  );
}

#[tokio::test]
async fn repeated_submission_is_served_from_cache() {
  let h = Harness::builder().project(leaf("/repo/a.json", "a")).start();
  let data = || BuildRequestData::new("/repo/a.json").with_targets(["Build"]);

  let first = h.session.submit(data()).await.unwrap();
  let started = h.events.started_targets().len();
  let second = h.session.submit(data()).await.unwrap();

  assert_eq!(first.targets, second.targets);
  assert_ne!(first.submission_id, second.submission_id);
  assert_eq!(h.events.started_targets().len(), started);
  assert_eq!(h.journal.count("a"), 1);
}

#[tokio::test]
async fn isolation_rejects_references_missing_from_cache() {
  let h = Harness::builder()
    .params(|p| p.isolation = ProjectIsolation::On)
    .project(referencing("/repo/a.json", "a", "b.json"))
    .project(leaf("/repo/b.json", "b"))
    .start();

  let result = h
    .session
    .submit(BuildRequestData::new("/repo/a.json").with_targets(["Build"]))
    .await
    .unwrap();

  assert!(!result.is_success());
  assert_eq!(result.targets["Build"].code, TargetResultCode::Failure);
  assert!(h.events.errors().iter().any(|e| e.contains("isolation")));
  assert_eq!(h.journal.count("b"), 0);
}

#[tokio::test]
async fn cancel_stops_at_the_next_task_boundary() {
  let h = Harness::builder()
    .project(
      ProjectInstance::new("/repo/a.json").with_target(
        TargetDef::new("Build")
          .with_task(TaskInvocation::new("Sleep").with_param("Millis", "200"))
          .with_task(record("after-sleep")),
      ),
    )
    .start();

  let (result, ()) = timeout(BUILD_TIMEOUT, async {
    tokio::join!(
      h.session.submit(BuildRequestData::new("/repo/a.json").with_targets(["Build"])),
      async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.session.cancel();
      }
    )
  })
  .await
  .unwrap();
  let result = result.unwrap();

  assert!(result.canceled);
  assert_eq!(result.error, Some(BuildError::Canceled));
  assert!(h.journal.entries().is_empty());
  assert!(h.events.errors().contains(&"build was canceled".to_string()));

  let later = h
    .session
    .submit(BuildRequestData::new("/repo/a.json").with_targets(["Other"]))
    .await
    .unwrap();
  assert!(later.canceled);
}

#[tokio::test]
async fn invalid_property_name_is_rejected() {
  let h = Harness::builder().project(leaf("/repo/a.json", "a")).start();

  let err = h
    .session
    .submit(BuildRequestData::new("/repo/a.json").with_property("bad;name", "x"))
    .await
    .unwrap_err();

  assert!(matches!(err, BuildError::InvalidIdentity(_)));
}

#[tokio::test]
async fn missing_project_fails_the_request() {
  let h = Harness::builder().start();

  let result = h
    .session
    .submit(BuildRequestData::new("/repo/none.json"))
    .await
    .unwrap();

  assert!(!result.is_success());
  assert!(matches!(result.error, Some(BuildError::ProjectLoad { .. })));
}
