//! Running one task invocation.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, trace};

use crate::eval::{evaluate_condition, expand_items, expand_string};
use crate::events::{BuildEvent, EventContext};
use crate::lookup::Lookup;
use crate::project::{ContinueOnError, Item, TaskInvocation};
use crate::target::ExecutionEnv;

use super::host::{TaskHost, report_error};
use super::registry::TaskRegistration;
use super::types::{ParamError, ParamType, ParamValue, Task};

/// How a task invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
  Succeeded,
  /// The condition was false; nothing ran.
  Skipped,
  /// Failed. Carries the invocation's error mode so the target knows what to do.
  Failed(ContinueOnError),
}

/// Expand and convert one raw parameter value. `None` means the value expanded to nothing.
fn bind_value(
  task: &str,
  name: &str,
  ty: ParamType,
  raw: &str,
  lookup: &Lookup,
) -> Result<Option<ParamValue>, ParamError> {
  let value = match ty {
    ParamType::String => {
      let s = expand_string(raw, lookup);
      (!s.is_empty()).then_some(ParamValue::String(s))
    }
    ParamType::Bool => {
      let s = expand_string(raw, lookup);
      let s = s.trim();
      if s.is_empty() {
        None
      } else if s.eq_ignore_ascii_case("true") {
        Some(ParamValue::Bool(true))
      } else if s.eq_ignore_ascii_case("false") {
        Some(ParamValue::Bool(false))
      } else {
        return Err(ParamError::InvalidBool {
          task: task.to_string(),
          name: name.to_string(),
          value: s.to_string(),
        });
      }
    }
    ParamType::ItemList => {
      let items = expand_items(raw, lookup);
      (!items.is_empty()).then_some(ParamValue::Items(items))
    }
    ParamType::StringList => {
      let values: Vec<String> = expand_items(raw, lookup).into_iter().map(|i| i.spec).collect();
      (!values.is_empty()).then_some(ParamValue::Strings(values))
    }
  };
  Ok(value)
}

/// Bind every declared parameter onto a fresh task instance.
fn bind(
  registration: &TaskRegistration,
  invocation: &TaskInvocation,
  lookup: &Lookup,
) -> Result<Box<dyn Task>, ParamError> {
  let schema = registration.schema();
  let mut bound = Vec::with_capacity(invocation.parameters.len());
  let mut names = HashSet::new();

  for (name, raw) in &invocation.parameters {
    let spec = schema.get(name).ok_or_else(|| ParamError::UnknownParameter {
      task: schema.name().to_string(),
      name: name.clone(),
    })?;
    if let Some(value) = bind_value(schema.name(), &spec.name, spec.ty, raw, lookup)? {
      names.insert(spec.name.to_ascii_lowercase());
      bound.push((spec.name.clone(), value));
    }
  }

  if let Some(missing) = schema
    .params()
    .iter()
    .find(|p| p.required && !names.contains(&p.name.to_ascii_lowercase()))
  {
    return Err(ParamError::MissingRequired {
      task: schema.name().to_string(),
      name: missing.name.clone(),
    });
  }

  for output in &invocation.outputs {
    match schema.get(&output.parameter) {
      None => {
        return Err(ParamError::UnknownParameter {
          task: schema.name().to_string(),
          name: output.parameter.clone(),
        });
      }
      Some(spec) if !spec.output => {
        return Err(ParamError::NotAnOutput {
          task: schema.name().to_string(),
          name: spec.name.clone(),
        });
      }
      Some(_) => {}
    }
  }

  let mut task = registration.create();
  for (name, value) in bound {
    trace!(task = %schema.name(), param = %name, "binding parameter");
    task.set_parameter(&name, value)?;
  }
  Ok(task)
}

/// Publish declared outputs into the current lookup scope.
fn gather_outputs(task: &dyn Task, invocation: &TaskInvocation, lookup: &mut Lookup) {
  for output in &invocation.outputs {
    let Some(value) = task.get_parameter(&output.parameter) else {
      continue;
    };
    if let Some(item_type) = &output.item_type {
      for item in value.clone().into_items() {
        lookup.add_item(item_type, item);
      }
    }
    if let Some(property) = &output.property {
      lookup.set_property(property, value.to_property());
    }
  }
}

/// Evaluate, bind, run and harvest one task.
///
/// Writes land in whatever lookup scope the caller entered; the caller decides
/// whether to merge or discard it based on the outcome.
pub(crate) async fn execute_task(
  env: &ExecutionEnv,
  invocation: &TaskInvocation,
  lookup: &mut Lookup,
  target_context: EventContext,
  up_to_date: &BTreeMap<String, Vec<Item>>,
) -> TaskOutcome {
  let ctx = env.coordinator.context();
  let mode = invocation.continue_on_error;

  if let Some(condition) = &invocation.condition {
    match evaluate_condition(condition, lookup) {
      Ok(true) => {}
      Ok(false) => {
        debug!(task = %invocation.name, condition = %condition, "task condition is false");
        return TaskOutcome::Skipped;
      }
      Err(err) => {
        report_error(
          &env.coordinator,
          target_context,
          mode,
          format!("task \"{}\": {}", invocation.name, err),
        );
        return TaskOutcome::Failed(mode);
      }
    }
  }

  let Some(registration) = ctx.registry.get(&invocation.name) else {
    report_error(
      &env.coordinator,
      target_context,
      mode,
      format!("task \"{}\" is not registered", invocation.name),
    );
    return TaskOutcome::Failed(mode);
  };

  let context = target_context.with_task(ctx.next_task_id());
  let task_name = registration.schema().name().to_string();
  let mut task = match bind(registration, invocation, lookup) {
    Ok(task) => task,
    Err(err) => {
      report_error(&env.coordinator, context, mode, err.to_string());
      return TaskOutcome::Failed(mode);
    }
  };

  ctx.logging.log(BuildEvent::TaskStarted {
    context,
    task: task_name.clone(),
  });

  let host = TaskHost::new(
    env.coordinator.clone(),
    env.frame.clone(),
    context,
    task_name.clone(),
    mode,
    up_to_date.clone(),
  );
  let succeeded = match task.execute(&host).await {
    Ok(true) => true,
    Ok(false) => {
      // A failed nested build has already logged why; only a silent failure gets the generic message.
      if !host.has_logged_errors() && !host.has_failed_nested_builds() {
        host.log_error(format!("task \"{}\" returned false but did not log an error", task_name));
      }
      false
    }
    Err(err) => {
      host.log_error(format!("task \"{}\" failed: {}", task_name, err));
      false
    }
  };

  if succeeded {
    gather_outputs(task.as_ref(), invocation, lookup);
  }

  ctx.logging.log(BuildEvent::TaskFinished {
    context,
    task: task_name,
    succeeded,
  });

  if succeeded {
    TaskOutcome::Succeeded
  } else {
    TaskOutcome::Failed(mode)
  }
}
