//! Types for the evaluated project model.
//!
//! The backend never parses project files. It consumes a `ProjectInstance` that an
//! evaluation layer has already produced: targets, items and properties with all
//! static expressions resolved.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// An item: a spec (usually a file path) plus ordered key/value metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item {
  pub spec: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub metadata: Vec<(String, String)>,
}

impl Item {
  pub fn new(spec: impl Into<String>) -> Self {
    Self {
      spec: spec.into(),
      metadata: Vec::new(),
    }
  }

  /// Add or replace a custom metadata value.
  pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.set_metadata(name, value);
    self
  }

  pub fn set_metadata(&mut self, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    let value = value.into();
    match self.metadata.iter_mut().find(|(k, _)| *k == name) {
      Some(entry) => entry.1 = value,
      None => self.metadata.push((name, value)),
    }
  }

  /// Look up metadata by name.
  ///
  /// Well-known metadata (`Identity`, `Filename`, `Extension`, `RelativeDir`) is derived
  /// from the spec; custom metadata shadows nothing and is returned as stored.
  pub fn metadata(&self, name: &str) -> Option<Cow<'_, str>> {
    let path = Path::new(&self.spec);
    match name {
      "Identity" => Some(Cow::Borrowed(&self.spec)),
      "Filename" => Some(Cow::Owned(
        path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default(),
      )),
      "Extension" => Some(Cow::Owned(
        path
          .extension()
          .map(|e| format!(".{}", e.to_string_lossy()))
          .unwrap_or_default(),
      )),
      "RelativeDir" => Some(Cow::Owned(match self.spec.rfind(['/', '\\']) {
        Some(idx) => self.spec[..=idx].to_string(),
        None => String::new(),
      })),
      _ => self
        .metadata
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| Cow::Borrowed(v.as_str())),
    }
  }
}

/// How a task failure affects the rest of its target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinueOnError {
  /// Log errors; stop the target and fail it.
  #[default]
  ErrorAndStop,
  /// Log errors as warnings; the target keeps going and succeeds.
  WarnAndContinue,
  /// Log errors; run the remaining tasks, then fail the target without stopping dependents.
  ErrorAndContinue,
}

/// Where a task output parameter is written after the task succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutput {
  /// Name of the task parameter to read.
  pub parameter: String,
  /// Item type receiving the value as items.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub item_type: Option<String>,
  /// Property receiving the value as a string.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub property: Option<String>,
}

/// One task inside a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInvocation {
  /// Registered task type name.
  pub name: String,
  /// Raw parameter expressions, expanded against the task's lookup at bind time.
  #[serde(default)]
  pub parameters: BTreeMap<String, String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub condition: Option<String>,
  #[serde(default)]
  pub continue_on_error: ContinueOnError,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub outputs: Vec<TaskOutput>,
}

impl TaskInvocation {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      parameters: BTreeMap::new(),
      condition: None,
      continue_on_error: ContinueOnError::default(),
      outputs: Vec::new(),
    }
  }

  pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.parameters.insert(name.into(), value.into());
    self
  }

  pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
    self.condition = Some(condition.into());
    self
  }

  pub fn with_continue_on_error(mut self, mode: ContinueOnError) -> Self {
    self.continue_on_error = mode;
    self
  }

  pub fn output_items(mut self, parameter: impl Into<String>, item_type: impl Into<String>) -> Self {
    self.outputs.push(TaskOutput {
      parameter: parameter.into(),
      item_type: Some(item_type.into()),
      property: None,
    });
    self
  }

  pub fn output_property(mut self, parameter: impl Into<String>, property: impl Into<String>) -> Self {
    self.outputs.push(TaskOutput {
      parameter: parameter.into(),
      item_type: None,
      property: Some(property.into()),
    });
    self
  }
}

/// A target definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDef {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub condition: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub inputs: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub outputs: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub depends_on: Vec<String>,
  /// Targets this target must run before.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub before_targets: Vec<String>,
  /// Targets this target must run after.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub after_targets: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub tasks: Vec<TaskInvocation>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub on_error: Vec<String>,
}

impl TargetDef {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      condition: None,
      inputs: None,
      outputs: None,
      depends_on: Vec::new(),
      before_targets: Vec::new(),
      after_targets: Vec::new(),
      tasks: Vec::new(),
      on_error: Vec::new(),
    }
  }

  pub fn depends_on<I, S>(mut self, names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.depends_on.extend(names.into_iter().map(Into::into));
    self
  }

  pub fn before<I, S>(mut self, names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.before_targets.extend(names.into_iter().map(Into::into));
    self
  }

  pub fn after<I, S>(mut self, names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.after_targets.extend(names.into_iter().map(Into::into));
    self
  }

  pub fn on_error<I, S>(mut self, names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.on_error.extend(names.into_iter().map(Into::into));
    self
  }

  pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
    self.condition = Some(condition.into());
    self
  }

  pub fn with_inputs(mut self, inputs: impl Into<String>) -> Self {
    self.inputs = Some(inputs.into());
    self
  }

  pub fn with_outputs(mut self, outputs: impl Into<String>) -> Self {
    self.outputs = Some(outputs.into());
    self
  }

  pub fn with_task(mut self, task: TaskInvocation) -> Self {
    self.tasks.push(task);
    self
  }
}

/// An evaluated project, as handed over by the evaluation layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInstance {
  /// Full path of the project file. Loaders fill this in from the configuration identity.
  #[serde(default)]
  pub path: PathBuf,
  #[serde(default)]
  pub default_targets: Vec<String>,
  #[serde(default)]
  pub initial_targets: Vec<String>,
  #[serde(default)]
  pub properties: BTreeMap<String, String>,
  #[serde(default)]
  pub items: BTreeMap<String, Vec<Item>>,
  #[serde(default)]
  pub targets: Vec<TargetDef>,
}

impl ProjectInstance {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      ..Default::default()
    }
  }

  pub fn with_target(mut self, target: TargetDef) -> Self {
    self.targets.push(target);
    self
  }

  pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.properties.insert(name.into(), value.into());
    self
  }

  pub fn with_item(mut self, item_type: impl Into<String>, item: Item) -> Self {
    self.items.entry(item_type.into()).or_default().push(item);
    self
  }

  pub fn with_default_targets<I, S>(mut self, names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.default_targets = names.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_initial_targets<I, S>(mut self, names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.initial_targets = names.into_iter().map(Into::into).collect();
    self
  }

  /// Directory containing the project file.
  pub fn directory(&self) -> PathBuf {
    self.path.parent().map(Path::to_path_buf).unwrap_or_default()
  }
}

/// A project instance plus the target edges derived from it.
///
/// Built once per configuration. `BeforeTargets`/`AfterTargets` declarations are
/// inverted here so the graph builder can ask "what runs before X" directly.
#[derive(Debug)]
pub struct EvaluatedProject {
  instance: ProjectInstance,
  index: HashMap<String, usize>,
  /// referenced target -> declaring targets, in declaration order
  before: HashMap<String, Vec<String>>,
  /// referenced target -> declaring targets, in declaration order
  after: HashMap<String, Vec<String>>,
}

impl EvaluatedProject {
  pub fn new(instance: ProjectInstance) -> Self {
    let mut index = HashMap::new();
    for (i, target) in instance.targets.iter().enumerate() {
      // First definition wins, as with duplicate keys in the loaders.
      index.entry(target.name.clone()).or_insert(i);
    }

    let mut before: HashMap<String, Vec<String>> = HashMap::new();
    let mut after: HashMap<String, Vec<String>> = HashMap::new();
    for target in &instance.targets {
      for referenced in &target.before_targets {
        if index.contains_key(referenced) {
          before.entry(referenced.clone()).or_default().push(target.name.clone());
        }
      }
      for referenced in &target.after_targets {
        if index.contains_key(referenced) {
          after.entry(referenced.clone()).or_default().push(target.name.clone());
        }
      }
    }

    Self {
      instance,
      index,
      before,
      after,
    }
  }

  pub fn instance(&self) -> &ProjectInstance {
    &self.instance
  }

  pub fn target(&self, name: &str) -> Option<&TargetDef> {
    self.index.get(name).map(|&i| &self.instance.targets[i])
  }

  pub fn has_target(&self, name: &str) -> bool {
    self.index.contains_key(name)
  }

  /// Targets that declared `BeforeTargets` naming `name`.
  pub fn runs_before(&self, name: &str) -> &[String] {
    self.before.get(name).map(Vec::as_slice).unwrap_or_default()
  }

  /// Targets that declared `AfterTargets` naming `name`.
  pub fn runs_after(&self, name: &str) -> &[String] {
    self.after.get(name).map(Vec::as_slice).unwrap_or_default()
  }

  /// Targets built when a request names none: the declared defaults, else the first target.
  pub fn default_targets(&self) -> Vec<String> {
    if !self.instance.default_targets.is_empty() {
      return self.instance.default_targets.clone();
    }
    self.instance.targets.first().map(|t| vec![t.name.clone()]).unwrap_or_default()
  }

  /// Every target reachable from `roots` through dependency, before, after and on-error edges.
  pub fn reachable_from(&self, roots: &[String]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    let mut pending: Vec<String> = roots.iter().rev().cloned().collect();
    while let Some(name) = pending.pop() {
      if seen.contains(&name) {
        continue;
      }
      let Some(target) = self.target(&name) else {
        continue;
      };
      let next = target
        .depends_on
        .iter()
        .chain(self.runs_before(&name))
        .chain(self.runs_after(&name))
        .chain(&target.on_error);
      pending.extend(next.cloned());
      seen.push(name);
    }
    seen
  }
}
