//! Engine tasks.
//!
//! These are the tasks the backend itself relies on: logging, touching files for
//! incremental builds, and the two nested-build entry points.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::debug;

use crate::project::Item;
use crate::scheduler::{BuildRequestData, BuildResult};
use crate::util::path::resolve_against;

use super::host::TaskHost;
use super::registry::TaskFactory;
use super::types::{ParamBag, ParamError, ParamType, ParamValue, Task, TaskError, TaskSchema};

/// Metadata on `BuildProject` items carrying extra `K=V` properties for that project.
pub const ADDITIONAL_PROPERTIES_METADATA: &str = "AdditionalProperties";

/// Metadata added to `BuildProject` outputs naming the project that produced them.
pub const SOURCE_PROJECT_METADATA: &str = "SourceProject";

fn factory<T: Task + Default + 'static>() -> TaskFactory {
  Arc::new(|| Box::new(T::default()) as Box<dyn Task>)
}

pub(crate) fn all() -> Vec<(TaskSchema, TaskFactory)> {
  vec![
    (
      TaskSchema::new("Message").required_param("Text", ParamType::String),
      factory::<MessageTask>(),
    ),
    (
      TaskSchema::new("Warning").required_param("Text", ParamType::String),
      factory::<WarningTask>(),
    ),
    (
      TaskSchema::new("Error").required_param("Text", ParamType::String),
      factory::<ErrorTask>(),
    ),
    (
      TaskSchema::new("Touch")
        .required_param("Files", ParamType::ItemList)
        .param("AlwaysCreate", ParamType::Bool)
        .output_param("TouchedFiles", ParamType::ItemList),
      factory::<TouchTask>(),
    ),
    (
      TaskSchema::new("CallTarget")
        .param("Targets", ParamType::StringList)
        .output_param("TargetOutputs", ParamType::ItemList),
      factory::<CallTargetTask>(),
    ),
    (
      TaskSchema::new("BuildProject")
        .required_param("Projects", ParamType::ItemList)
        .param("Targets", ParamType::StringList)
        .param("Properties", ParamType::StringList)
        .output_param("TargetOutputs", ParamType::ItemList),
      factory::<BuildProjectTask>(),
    ),
  ]
}

/// Items produced by `targets`, in the order they were requested.
fn outputs_in_order(result: &BuildResult, targets: &[String]) -> Vec<Item> {
  if targets.is_empty() {
    return result.items();
  }
  targets
    .iter()
    .filter_map(|t| result.targets.get(t))
    .flat_map(|r| r.items.iter().cloned())
    .collect()
}

/// Parse `K=V` entries. Empty entries are skipped.
fn parse_properties(entries: &[String]) -> Result<BTreeMap<String, String>, String> {
  let mut properties = BTreeMap::new();
  for entry in entries {
    let entry = entry.trim();
    if entry.is_empty() {
      continue;
    }
    match entry.split_once('=') {
      Some((key, value)) if !key.trim().is_empty() => {
        properties.insert(key.trim().to_string(), value.trim().to_string());
      }
      _ => return Err(entry.to_string()),
    }
  }
  Ok(properties)
}

#[derive(Debug, Default)]
pub struct MessageTask {
  params: ParamBag,
}

#[async_trait]
impl Task for MessageTask {
  fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError> {
    self.params.set(name, value);
    Ok(())
  }

  async fn execute(&mut self, host: &TaskHost) -> Result<bool, TaskError> {
    host.log_message(self.params.string("Text").unwrap_or_default());
    Ok(true)
  }

  fn get_parameter(&self, name: &str) -> Option<ParamValue> {
    self.params.get(name).cloned()
  }
}

#[derive(Debug, Default)]
pub struct WarningTask {
  params: ParamBag,
}

#[async_trait]
impl Task for WarningTask {
  fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError> {
    self.params.set(name, value);
    Ok(())
  }

  async fn execute(&mut self, host: &TaskHost) -> Result<bool, TaskError> {
    host.log_warning(self.params.string("Text").unwrap_or_default());
    Ok(true)
  }

  fn get_parameter(&self, name: &str) -> Option<ParamValue> {
    self.params.get(name).cloned()
  }
}

/// Logs an error and fails.
#[derive(Debug, Default)]
pub struct ErrorTask {
  params: ParamBag,
}

#[async_trait]
impl Task for ErrorTask {
  fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError> {
    self.params.set(name, value);
    Ok(())
  }

  async fn execute(&mut self, host: &TaskHost) -> Result<bool, TaskError> {
    host.log_error(self.params.string("Text").unwrap_or_default());
    Ok(false)
  }

  fn get_parameter(&self, name: &str) -> Option<ParamValue> {
    self.params.get(name).cloned()
  }
}

/// Sets the modification time of files to now.
///
/// Missing files are created when `AlwaysCreate` is true and are an error otherwise.
#[derive(Debug, Default)]
pub struct TouchTask {
  params: ParamBag,
  touched: Vec<Item>,
}

#[async_trait]
impl Task for TouchTask {
  fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError> {
    self.params.set(name, value);
    Ok(())
  }

  async fn execute(&mut self, host: &TaskHost) -> Result<bool, TaskError> {
    let always_create = self.params.bool("AlwaysCreate");
    let mut ok = true;
    for item in self.params.items("Files") {
      let path = resolve_against(host.project_directory(), &item.spec);
      if !path.exists() {
        if !always_create {
          host.log_error(format!("cannot touch \"{}\": file does not exist", path.display()));
          ok = false;
          continue;
        }
        if let Some(parent) = path.parent() {
          fs::create_dir_all(parent).map_err(|source| TaskError::Io {
            path: parent.to_path_buf(),
            source,
          })?;
        }
        File::create(&path).map_err(|source| TaskError::Io {
          path: path.clone(),
          source,
        })?;
        debug!(path = %path.display(), "created file");
      }

      let io_err = |source| TaskError::Io {
        path: path.clone(),
        source,
      };
      let file = File::options().write(true).open(&path).map_err(io_err)?;
      file.set_modified(SystemTime::now()).map_err(io_err)?;
      self.touched.push(item);
    }
    Ok(ok)
  }

  fn get_parameter(&self, name: &str) -> Option<ParamValue> {
    if name.eq_ignore_ascii_case("TouchedFiles") {
      return Some(ParamValue::Items(self.touched.clone()));
    }
    self.params.get(name).cloned()
  }
}

/// Builds targets of the calling project.
#[derive(Debug, Default)]
pub struct CallTargetTask {
  params: ParamBag,
  outputs: Vec<Item>,
}

#[async_trait]
impl Task for CallTargetTask {
  fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError> {
    self.params.set(name, value);
    Ok(())
  }

  async fn execute(&mut self, host: &TaskHost) -> Result<bool, TaskError> {
    let targets = self.params.strings("Targets");
    if targets.is_empty() {
      debug!(task = host.task_name(), "no targets to call");
      return Ok(true);
    }
    let result = host.call_targets(targets.clone()).await;
    self.outputs = outputs_in_order(&result, &targets);
    Ok(result.is_success())
  }

  fn get_parameter(&self, name: &str) -> Option<ParamValue> {
    if name.eq_ignore_ascii_case("TargetOutputs") {
      return Some(ParamValue::Items(self.outputs.clone()));
    }
    self.params.get(name).cloned()
  }
}

/// Builds other projects. The project-to-project call.
#[derive(Debug, Default)]
pub struct BuildProjectTask {
  params: ParamBag,
  outputs: Vec<Item>,
}

#[async_trait]
impl Task for BuildProjectTask {
  fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError> {
    self.params.set(name, value);
    Ok(())
  }

  async fn execute(&mut self, host: &TaskHost) -> Result<bool, TaskError> {
    let targets = self.params.strings("Targets");
    let properties = match parse_properties(&self.params.strings("Properties")) {
      Ok(properties) => properties,
      Err(entry) => {
        host.log_error(format!("invalid property \"{}\"; expected KEY=VALUE", entry));
        return Ok(false);
      }
    };

    let projects = self.params.items("Projects");
    let mut requests = Vec::with_capacity(projects.len());
    for project in &projects {
      let mut project_properties = properties.clone();
      if let Some(extra) = project.metadata(ADDITIONAL_PROPERTIES_METADATA) {
        let entries: Vec<String> = extra.split(';').map(str::to_string).collect();
        match parse_properties(&entries) {
          Ok(extra) => project_properties.extend(extra),
          Err(entry) => {
            host.log_error(format!(
              "invalid property \"{}\" on project \"{}\"; expected KEY=VALUE",
              entry, project.spec
            ));
            return Ok(false);
          }
        }
      }
      requests.push(
        BuildRequestData::new(resolve_against(host.project_directory(), &project.spec))
          .with_properties(project_properties)
          .with_targets(targets.clone()),
      );
    }

    let results = host.build_projects(requests).await;
    let mut ok = true;
    for (project, result) in projects.iter().zip(&results) {
      ok &= result.is_success();
      self.outputs.extend(
        outputs_in_order(result, &targets)
          .into_iter()
          .map(|item| item.with_metadata(SOURCE_PROJECT_METADATA, project.spec.clone())),
      );
    }
    Ok(ok)
  }

  fn get_parameter(&self, name: &str) -> Option<ParamValue> {
    if name.eq_ignore_ascii_case("TargetOutputs") {
      return Some(ParamValue::Items(self.outputs.clone()));
    }
    self.params.get(name).cloned()
  }
}
