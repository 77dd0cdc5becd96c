//! Up-to-date checks driven by target inputs and outputs.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use kiln_lib::events::{BuildEvent, SkipReason};
use kiln_lib::incremental::MemoryTimestamps;
use kiln_lib::project::{Item, ProjectInstance, TargetDef, TaskInvocation};
use kiln_lib::scheduler::BuildRequestData;
use kiln_lib::target::TargetResultCode;
use tempfile::TempDir;

use crate::common::{Harness, message, record};

const APP: &str = "/work/app.json";

fn at(secs: u64) -> SystemTime {
  SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
}

fn sources() -> ProjectInstance {
  ProjectInstance::new(APP)
    .with_item("Source", Item::new("src/a.c"))
    .with_item("Source", Item::new("src/b.c"))
}

fn skip_reason(h: &Harness, target: &str) -> Option<SkipReason> {
  h.events.events().into_iter().find_map(|e| match e {
    BuildEvent::TargetSkipped { target: t, reason, .. } if t == target => Some(reason),
    _ => None,
  })
}

fn link_project() -> ProjectInstance {
  sources().with_target(
    TargetDef::new("Link")
      .with_inputs("@(Source)")
      .with_outputs("bin/app.exe")
      .with_task(record("Link")),
  )
}

#[tokio::test]
async fn up_to_date_target_is_skipped_with_its_outputs() {
  let stamps = Arc::new(MemoryTimestamps::new());
  stamps.set("/work/src/a.c", at(0));
  stamps.set("/work/src/b.c", at(5));
  stamps.set("/work/bin/app.exe", at(10));
  let h = Harness::builder().timestamps(stamps).project(link_project()).start();

  let result = h
    .session
    .submit(BuildRequestData::new(APP).with_targets(["Link"]))
    .await
    .unwrap();

  assert!(result.is_success());
  assert_eq!(result.targets["Link"].code, TargetResultCode::Success);
  assert_eq!(result.targets["Link"].items, vec![Item::new("bin/app.exe")]);
  assert!(h.journal.entries().is_empty());
  assert_eq!(skip_reason(&h, "Link"), Some(SkipReason::UpToDate));
  assert!(h.events.started_targets().is_empty());
}

#[tokio::test]
async fn newer_input_rebuilds_target() {
  let stamps = Arc::new(MemoryTimestamps::new());
  stamps.set("/work/src/a.c", at(0));
  stamps.set("/work/src/b.c", at(20));
  stamps.set("/work/bin/app.exe", at(10));
  let h = Harness::builder().timestamps(stamps).project(link_project()).start();

  let result = h
    .session
    .submit(BuildRequestData::new(APP).with_targets(["Link"]))
    .await
    .unwrap();

  assert!(result.is_success());
  assert_eq!(h.journal.entries(), vec!["Link"]);
  assert_eq!(skip_reason(&h, "Link"), None);
}

#[tokio::test]
async fn missing_output_rebuilds_target() {
  let stamps = Arc::new(MemoryTimestamps::new());
  stamps.set("/work/src/a.c", at(0));
  stamps.set("/work/src/b.c", at(0));
  let h = Harness::builder().timestamps(stamps).project(link_project()).start();

  h.session
    .submit(BuildRequestData::new(APP).with_targets(["Link"]))
    .await
    .unwrap();

  assert_eq!(h.journal.entries(), vec!["Link"]);
}

#[tokio::test]
async fn only_stale_items_are_rebuilt() {
  let stamps = Arc::new(MemoryTimestamps::new());
  stamps.set("/work/src/a.c", at(0));
  stamps.set("/work/obj/a.o", at(10));
  stamps.set("/work/src/b.c", at(20));
  stamps.set("/work/obj/b.o", at(10));
  let h = Harness::builder()
    .timestamps(stamps)
    .project(
      sources().with_target(
        TargetDef::new("Compile")
          .with_inputs("@(Source)")
          .with_outputs("@(Source->'obj/%(Filename).o')")
          .with_task(message("compiling @(Source)")),
      ),
    )
    .start();

  let result = h
    .session
    .submit(BuildRequestData::new(APP).with_targets(["Compile"]))
    .await
    .unwrap();

  assert!(result.is_success());
  assert_eq!(h.events.messages(), vec!["compiling src/b.c"]);
  // The target still reports every output.
  assert_eq!(
    result.targets["Compile"].items,
    vec![Item::new("obj/a.o"), Item::new("obj/b.o")]
  );
}

#[tokio::test]
async fn inputs_expanding_to_nothing_skip_the_target() {
  let h = Harness::builder()
    .project(
      ProjectInstance::new(APP).with_target(
        TargetDef::new("Pack")
          .with_inputs("@(Nothing)")
          .with_outputs("pack.zip")
          .with_task(record("Pack")),
      ),
    )
    .start();

  let result = h
    .session
    .submit(BuildRequestData::new(APP).with_targets(["Pack"]))
    .await
    .unwrap();

  assert!(result.is_success());
  assert!(h.journal.entries().is_empty());
  assert_eq!(skip_reason(&h, "Pack"), Some(SkipReason::NoItems));
}

#[tokio::test]
async fn touched_outputs_are_current_on_the_next_build() {
  let temp = TempDir::new().unwrap();
  let dir = temp.path().to_path_buf();
  let input = dir.join("input.txt");
  std::fs::write(&input, "data").unwrap();
  std::fs::File::options()
    .write(true)
    .open(&input)
    .unwrap()
    .set_modified(SystemTime::now() - Duration::from_secs(60))
    .unwrap();

  let project_path = dir.join("proj.json");
  let project = || {
    ProjectInstance::new(&project_path).with_target(
      TargetDef::new("Stamp")
        .with_inputs("input.txt")
        .with_outputs("out/stamp.txt")
        .with_task(
          TaskInvocation::new("Touch")
            .with_param("Files", "out/stamp.txt")
            .with_param("AlwaysCreate", "true"),
        ),
    )
  };

  let first = Harness::builder().project(project()).start();
  let result = first
    .session
    .submit(BuildRequestData::new(&project_path).with_targets(["Stamp"]))
    .await
    .unwrap();
  assert!(result.is_success(), "{:?}", first.events.errors());
  assert!(dir.join("out/stamp.txt").exists());
  assert_eq!(first.events.started_targets(), vec!["Stamp"]);

  let second = Harness::builder().project(project()).start();
  let result = second
    .session
    .submit(BuildRequestData::new(&project_path).with_targets(["Stamp"]))
    .await
    .unwrap();
  assert!(result.is_success());
  assert!(second.events.started_targets().is_empty());
  assert_eq!(skip_reason(&second, "Stamp"), Some(SkipReason::UpToDate));
}
