//! Target ordering, failure handling and skip rules within one project.

use kiln_lib::events::{BuildEvent, SkipReason};
use kiln_lib::project::{ContinueOnError, Item, ProjectInstance, TargetDef, TaskInvocation};
use kiln_lib::scheduler::{BuildError, BuildRequestData};
use kiln_lib::target::TargetResultCode;

use crate::common::{Harness, error, message, produce, record};

const APP: &str = "/work/app.json";

fn app() -> ProjectInstance {
  ProjectInstance::new(APP)
}

#[tokio::test]
async fn dependencies_run_first_and_once() {
  let h = Harness::builder()
    .project(
      app()
        .with_target(TargetDef::new("Build").depends_on(["Compile", "Resources"]).with_task(record("Build")))
        .with_target(TargetDef::new("Compile").depends_on(["Restore"]).with_task(record("Compile")))
        .with_target(TargetDef::new("Resources").depends_on(["Restore"]).with_task(record("Resources")))
        .with_target(TargetDef::new("Restore").with_task(record("Restore")))
        .with_default_targets(["Build"]),
    )
    .start();

  let result = h.session.submit(BuildRequestData::new(APP)).await.unwrap();

  assert!(result.is_success());
  assert_eq!(h.journal.entries(), vec!["Restore", "Compile", "Resources", "Build"]);
  assert_eq!(result.targets.keys().collect::<Vec<_>>(), vec!["Build"]);
}

#[tokio::test]
async fn before_and_after_targets_wrap_the_target() {
  let h = Harness::builder()
    .project(
      app()
        .with_target(TargetDef::new("Build").with_task(record("Build")))
        .with_target(TargetDef::new("Prepare").before(["Build"]).with_task(record("Prepare")))
        .with_target(TargetDef::new("Publish").after(["Build"]).with_task(record("Publish")))
        .with_target(TargetDef::new("Ghost").after(["Missing"]).with_task(record("Ghost"))),
    )
    .start();

  let result = h
    .session
    .submit(BuildRequestData::new(APP).with_targets(["Build"]))
    .await
    .unwrap();

  assert!(result.is_success());
  assert_eq!(h.journal.entries(), vec!["Prepare", "Build", "Publish"]);
}

#[tokio::test]
async fn two_before_targets_run_in_declaration_order() {
  let h = Harness::builder()
    .project(
      app()
        .with_target(TargetDef::new("Build").with_task(record("Build")))
        .with_target(TargetDef::new("First").before(["Build"]).with_task(record("First")))
        .with_target(TargetDef::new("Second").before(["Build"]).with_task(record("Second"))),
    )
    .start();

  let result = h
    .session
    .submit(BuildRequestData::new(APP).with_targets(["Build"]))
    .await
    .unwrap();

  assert!(result.is_success());
  assert_eq!(h.journal.entries(), vec!["First", "Second", "Build"]);
}

#[tokio::test]
async fn before_reference_to_missing_target_is_ignored_quietly() {
  let h = Harness::builder()
    .project(
      app()
        .with_target(TargetDef::new("Build").with_task(record("Build")))
        .with_target(TargetDef::new("Orphan").before(["Missing"]).with_task(record("Orphan"))),
    )
    .start();

  let result = h
    .session
    .submit(BuildRequestData::new(APP).with_targets(["Build"]))
    .await
    .unwrap();

  assert!(result.is_success());
  assert_eq!(h.journal.entries(), vec!["Build"]);
  assert!(h.events.errors().is_empty(), "{:?}", h.events.errors());
  assert!(h.events.warnings().is_empty(), "{:?}", h.events.warnings());
}

#[tokio::test]
async fn call_target_with_no_targets_does_nothing() {
  let h = Harness::builder()
    .project(
      app()
        .with_target(TargetDef::new("Build").with_task(record("Build")))
        .with_target(
          TargetDef::new("Outer")
            .with_task(TaskInvocation::new("CallTarget").with_param("Targets", "$(Missing)"))
            .with_task(record("Outer")),
        )
        .with_default_targets(["Build"]),
    )
    .start();

  let result = h
    .session
    .submit(BuildRequestData::new(APP).with_targets(["Outer"]))
    .await
    .unwrap();

  assert!(result.is_success(), "{:?}", h.events.errors());
  assert_eq!(h.journal.entries(), vec!["Outer"]);
}

#[tokio::test]
async fn failed_call_target_does_not_add_a_generic_error() {
  let h = Harness::builder()
    .project(
      app()
        .with_target(TargetDef::new("Broken").with_task(error("inner failure")))
        .with_target(
          TargetDef::new("Outer").with_task(TaskInvocation::new("CallTarget").with_param("Targets", "Broken")),
        ),
    )
    .start();

  let result = h
    .session
    .submit(BuildRequestData::new(APP).with_targets(["Outer"]))
    .await
    .unwrap();

  assert!(!result.is_success());
  assert_eq!(h.events.errors(), vec!["inner failure"]);
}

#[tokio::test]
async fn initial_targets_run_before_requested_targets() {
  let h = Harness::builder()
    .project(
      app()
        .with_target(TargetDef::new("Build").with_task(record("Build")))
        .with_target(TargetDef::new("Validate").with_task(record("Validate")))
        .with_initial_targets(["Validate"])
        .with_default_targets(["Build"]),
    )
    .start();

  let result = h.session.submit(BuildRequestData::new(APP)).await.unwrap();

  assert!(result.is_success());
  assert_eq!(h.journal.entries(), vec!["Validate", "Build"]);
  // Initial targets are built but not reported.
  assert!(!result.targets.contains_key("Validate"));
}

#[tokio::test]
async fn false_condition_skips_target_but_not_after_targets() {
  let h = Harness::builder()
    .project(
      app()
        .with_property("Sign", "false")
        .with_target(
          TargetDef::new("Sign")
            .with_condition("'$(Sign)' == 'true'")
            .depends_on(["Certificate"])
            .with_task(record("Sign")),
        )
        .with_target(TargetDef::new("Certificate").with_task(record("Certificate")))
        .with_target(TargetDef::new("Report").after(["Sign"]).with_task(record("Report"))),
    )
    .start();

  let result = h
    .session
    .submit(BuildRequestData::new(APP).with_targets(["Sign"]))
    .await
    .unwrap();

  assert!(result.is_success());
  assert_eq!(result.targets["Sign"].code, TargetResultCode::Skipped);
  // Dependencies of a skipped target are not built.
  assert_eq!(h.journal.entries(), vec!["Report"]);
  assert!(h.events.events().iter().any(|e| matches!(
    e,
    BuildEvent::TargetSkipped { target, reason: SkipReason::ConditionFalse, .. } if target == "Sign"
  )));
}

#[tokio::test]
async fn global_properties_reach_conditions() {
  let h = Harness::builder()
    .project(
      app()
        .with_property("Sign", "false")
        .with_target(TargetDef::new("Sign").with_condition("'$(Sign)' == 'TRUE'").with_task(record("Sign"))),
    )
    .start();

  let result = h
    .session
    .submit(BuildRequestData::new(APP).with_targets(["Sign"]).with_property("Sign", "true"))
    .await
    .unwrap();

  assert!(result.is_success());
  assert_eq!(result.targets["Sign"].code, TargetResultCode::Success);
  assert_eq!(h.journal.entries(), vec!["Sign"]);
}

#[tokio::test]
async fn failed_task_stops_target_and_runs_on_error() {
  let h = Harness::builder()
    .project(
      app()
        .with_target(
          TargetDef::new("Build")
            .depends_on(["Compile"])
            .with_task(record("Build")),
        )
        .with_target(
          TargetDef::new("Compile")
            .on_error(["Cleanup", "NotDefined"])
            .with_task(record("Compile.before"))
            .with_task(error("compiler crashed"))
            .with_task(record("Compile.after")),
        )
        .with_target(TargetDef::new("Cleanup").with_task(record("Cleanup")))
        .with_target(TargetDef::new("Publish").after(["Compile"]).with_task(record("Publish"))),
    )
    .start();

  let result = h
    .session
    .submit(BuildRequestData::new(APP).with_targets(["Build"]))
    .await
    .unwrap();

  assert!(!result.is_success());
  assert_eq!(result.targets["Build"].code, TargetResultCode::Failure);
  assert_eq!(h.journal.entries(), vec!["Compile.before", "Cleanup"]);
  assert_eq!(h.events.errors(), vec!["compiler crashed"]);
  assert_eq!(
    h.session.results_cache().target_result(result.configuration_id.unwrap(), "Compile").map(|r| r.code),
    Some(TargetResultCode::Failure)
  );
}

#[tokio::test]
async fn warn_and_continue_turns_errors_into_warnings() {
  let h = Harness::builder()
    .project(
      app().with_target(
        TargetDef::new("Build")
          .with_task(error("flaky step").with_continue_on_error(ContinueOnError::WarnAndContinue))
          .with_task(record("Build")),
      ),
    )
    .start();

  let result = h
    .session
    .submit(BuildRequestData::new(APP).with_targets(["Build"]))
    .await
    .unwrap();

  assert!(result.is_success());
  assert_eq!(h.journal.entries(), vec!["Build"]);
  assert!(h.events.errors().is_empty());
  assert_eq!(h.events.warnings(), vec!["flaky step"]);
}

#[tokio::test]
async fn error_and_continue_runs_the_rest_then_fails() {
  let h = Harness::builder()
    .project(
      app()
        .with_target(TargetDef::new("Build").depends_on(["Test"]).with_task(record("Build")))
        .with_target(
          TargetDef::new("Test")
            .with_task(error("one test failed").with_continue_on_error(ContinueOnError::ErrorAndContinue))
            .with_task(record("Test.report")),
        ),
    )
    .start();

  let result = h
    .session
    .submit(BuildRequestData::new(APP).with_targets(["Test", "Build"]))
    .await
    .unwrap();

  assert!(!result.is_success());
  assert_eq!(result.targets["Test"].code, TargetResultCode::Failure);
  // The failure does not stop dependents.
  assert_eq!(result.targets["Build"].code, TargetResultCode::Success);
  assert_eq!(h.journal.entries(), vec!["Test.report", "Build"]);
}

#[tokio::test]
async fn first_stopping_failure_ends_the_request() {
  let h = Harness::builder()
    .project(
      app()
        .with_target(TargetDef::new("Broken").with_task(error("broken")))
        .with_target(TargetDef::new("Fine").with_task(record("Fine"))),
    )
    .start();

  let result = h
    .session
    .submit(BuildRequestData::new(APP).with_targets(["Broken", "Fine"]))
    .await
    .unwrap();

  assert!(!result.is_success());
  assert!(!result.targets.contains_key("Fine"));
  assert!(h.journal.entries().is_empty());
}

#[tokio::test]
async fn continue_on_failure_builds_remaining_targets() {
  let h = Harness::builder()
    .params(|p| p.continue_on_failure = true)
    .project(
      app()
        .with_target(TargetDef::new("Broken").with_task(error("broken")))
        .with_target(TargetDef::new("Fine").with_task(record("Fine"))),
    )
    .start();

  let result = h
    .session
    .submit(BuildRequestData::new(APP).with_targets(["Broken", "Fine"]))
    .await
    .unwrap();

  assert!(!result.is_success());
  assert_eq!(result.targets["Fine"].code, TargetResultCode::Success);
  assert_eq!(h.journal.entries(), vec!["Fine"]);
}

#[tokio::test]
async fn missing_targets() {
  let h = Harness::builder()
    .project(
      app()
        .with_target(TargetDef::new("Build").depends_on(["Missing"]))
        .with_target(TargetDef::new("Fine").with_task(record("Fine"))),
    )
    .start();

  let result = h
    .session
    .submit(BuildRequestData::new(APP).with_targets(["Build"]))
    .await
    .unwrap();
  assert!(!result.is_success());
  assert!(matches!(
    result.error,
    Some(BuildError::TargetNotFound { ref target, .. }) if target == "Missing"
  ));

  let result = h
    .session
    .submit(
      BuildRequestData::new(APP)
        .with_targets(["Nope", "Fine"])
        .skip_nonexistent_targets(true),
    )
    .await
    .unwrap();
  assert!(result.is_success());
  assert_eq!(result.targets["Nope"].code, TargetResultCode::Skipped);
  assert_eq!(result.targets["Fine"].code, TargetResultCode::Success);
}

#[tokio::test]
async fn circular_dependency_is_an_error() {
  let h = Harness::builder()
    .project(
      app()
        .with_target(TargetDef::new("A").depends_on(["B"]))
        .with_target(TargetDef::new("B").depends_on(["C"]))
        .with_target(TargetDef::new("C").depends_on(["A"])),
    )
    .start();

  let result = h
    .session
    .submit(BuildRequestData::new(APP).with_targets(["A"]))
    .await
    .unwrap();

  assert!(!result.is_success());
  assert_eq!(
    result.error,
    Some(BuildError::CircularDependency {
      chain: vec!["A".into(), "B".into(), "C".into(), "A".into()]
    })
  );
  assert_eq!(h.events.errors(), vec!["circular dependency: A -> B -> C -> A"]);
}

#[tokio::test]
async fn task_outputs_flow_into_later_targets() {
  let h = Harness::builder()
    .project(
      app()
        .with_item("Source", Item::new("src/a.c"))
        .with_item("Source", Item::new("src/b.c"))
        .with_target(
          TargetDef::new("Compile")
            .with_outputs("@(Objects)")
            .with_task(produce("Compile", "@(Source->'obj/%(Filename).o')", "Objects")),
        )
        .with_target(
          TargetDef::new("Link")
            .depends_on(["Compile"])
            .with_outputs("app.exe")
            .with_task(message("linking @(Objects)")),
        ),
    )
    .start();

  let result = h
    .session
    .submit(BuildRequestData::new(APP).with_targets(["Compile", "Link"]))
    .await
    .unwrap();

  assert!(result.is_success(), "{:?}", h.events.errors());
  assert_eq!(
    result.targets["Compile"].items,
    vec![Item::new("obj/a.o"), Item::new("obj/b.o")]
  );
  assert_eq!(result.targets["Link"].items, vec![Item::new("app.exe")]);
  assert!(h.events.messages().contains(&"linking obj/a.o;obj/b.o".to_string()));
}

#[tokio::test]
async fn failed_target_discards_its_outputs() {
  let h = Harness::builder()
    .params(|p| p.continue_on_failure = true)
    .project(
      app()
        .with_target(
          TargetDef::new("Generate")
            .with_task(produce("Generate", "gen.c", "Generated"))
            .with_task(error("generator failed")),
        )
        .with_target(TargetDef::new("Report").with_task(message("generated: @(Generated)"))),
    )
    .start();

  let result = h
    .session
    .submit(BuildRequestData::new(APP).with_targets(["Generate", "Report"]))
    .await
    .unwrap();

  assert!(!result.is_success());
  assert_eq!(h.events.messages(), vec!["generated: "]);
}

#[tokio::test]
async fn call_target_returns_outputs_of_called_targets() {
  let h = Harness::builder()
    .project(
      app()
        .with_target(
          TargetDef::new("Package")
            .with_outputs("@(Parts)")
            .with_task(
              TaskInvocation::new("CallTarget")
                .with_param("Targets", "Docs;Binaries")
                .output_items("TargetOutputs", "Parts"),
            ),
        )
        .with_target(TargetDef::new("Binaries").with_outputs("bin/app.exe").with_task(record("Binaries")))
        .with_target(TargetDef::new("Docs").with_outputs("doc/index.html").with_task(record("Docs"))),
    )
    .start();

  let result = h
    .session
    .submit(BuildRequestData::new(APP).with_targets(["Package"]))
    .await
    .unwrap();

  assert!(result.is_success(), "{:?}", h.events.errors());
  assert_eq!(
    result.targets["Package"].items,
    vec![Item::new("doc/index.html"), Item::new("bin/app.exe")]
  );
  assert_eq!(h.journal.entries(), vec!["Docs", "Binaries"]);
}
