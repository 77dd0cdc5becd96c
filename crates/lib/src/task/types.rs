//! Task contract and parameter schema.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::project::Item;
use crate::scheduler::BuildError;

use super::host::TaskHost;

/// The type of a task parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
  String,
  Bool,
  ItemList,
  StringList,
}

impl std::fmt::Display for ParamType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      ParamType::String => "string",
      ParamType::Bool => "bool",
      ParamType::ItemList => "item list",
      ParamType::StringList => "string list",
    };
    f.write_str(name)
  }
}

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
  String(String),
  Bool(bool),
  Items(Vec<Item>),
  Strings(Vec<String>),
}

impl ParamValue {
  pub fn param_type(&self) -> ParamType {
    match self {
      ParamValue::String(_) => ParamType::String,
      ParamValue::Bool(_) => ParamType::Bool,
      ParamValue::Items(_) => ParamType::ItemList,
      ParamValue::Strings(_) => ParamType::StringList,
    }
  }

  /// Render as a property value. Lists are joined with `;`.
  pub fn to_property(&self) -> String {
    match self {
      ParamValue::String(s) => s.clone(),
      ParamValue::Bool(b) => b.to_string(),
      ParamValue::Items(items) => items.iter().map(|i| i.spec.as_str()).collect::<Vec<_>>().join(";"),
      ParamValue::Strings(values) => values.join(";"),
    }
  }

  /// Convert to items. Strings are split on `;`.
  pub fn into_items(self) -> Vec<Item> {
    match self {
      ParamValue::Items(items) => items,
      ParamValue::Strings(values) => values.into_iter().map(Item::new).collect(),
      ParamValue::String(s) => s
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Item::new)
        .collect(),
      ParamValue::Bool(b) => vec![Item::new(b.to_string())],
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
  pub name: String,
  pub ty: ParamType,
  pub required: bool,
  pub output: bool,
}

/// The static parameter schema of a task type.
///
/// Parameter names are matched ASCII case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSchema {
  name: String,
  params: Vec<ParamSpec>,
}

impl TaskSchema {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      params: Vec::new(),
    }
  }

  fn push(mut self, name: &str, ty: ParamType, required: bool, output: bool) -> Self {
    self.params.push(ParamSpec {
      name: name.to_string(),
      ty,
      required,
      output,
    });
    self
  }

  pub fn param(self, name: &str, ty: ParamType) -> Self {
    self.push(name, ty, false, false)
  }

  pub fn required_param(self, name: &str, ty: ParamType) -> Self {
    self.push(name, ty, true, false)
  }

  pub fn output_param(self, name: &str, ty: ParamType) -> Self {
    self.push(name, ty, false, true)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn params(&self) -> &[ParamSpec] {
    &self.params
  }

  pub fn get(&self, name: &str) -> Option<&ParamSpec> {
    self.params.iter().find(|p| p.name.eq_ignore_ascii_case(name))
  }

  /// The first parameter name declared twice, if any.
  pub(crate) fn duplicate(&self) -> Option<&str> {
    self.params.iter().enumerate().find_map(|(i, p)| {
      self.params[..i]
        .iter()
        .any(|q| q.name.eq_ignore_ascii_case(&p.name))
        .then_some(p.name.as_str())
    })
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
  #[error("task \"{task}\" has no parameter \"{name}\"")]
  UnknownParameter { task: String, name: String },

  #[error("task \"{task}\" requires parameter \"{name}\"")]
  MissingRequired { task: String, name: String },

  #[error("parameter \"{name}\" of task \"{task}\" expects a bool, got \"{value}\"")]
  InvalidBool { task: String, name: String, value: String },

  #[error("parameter \"{name}\" of task \"{task}\" is not an output")]
  NotAnOutput { task: String, name: String },
}

#[derive(Debug, Error)]
pub enum TaskError {
  #[error("{0}")]
  Failed(String),

  #[error("I/O error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Build(#[from] BuildError),
}

/// A unit of work inside a target.
///
/// The executor sets every bound parameter, calls `execute` once, then reads output
/// parameters back. Returning `Ok(false)` means failure; a task that fails should log
/// an error through the host first.
#[async_trait]
pub trait Task: Send {
  fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError>;

  async fn execute(&mut self, host: &TaskHost) -> Result<bool, TaskError>;

  fn get_parameter(&self, name: &str) -> Option<ParamValue>;
}

/// Parameter storage for tasks that keep values by name.
#[derive(Debug, Clone, Default)]
pub struct ParamBag {
  values: BTreeMap<String, ParamValue>,
}

impl ParamBag {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(&mut self, name: &str, value: ParamValue) {
    self.values.insert(name.to_ascii_lowercase(), value);
  }

  pub fn get(&self, name: &str) -> Option<&ParamValue> {
    self.values.get(&name.to_ascii_lowercase())
  }

  pub fn string(&self, name: &str) -> Option<String> {
    self.get(name).map(ParamValue::to_property)
  }

  pub fn bool(&self, name: &str) -> bool {
    matches!(self.get(name), Some(ParamValue::Bool(true)))
  }

  pub fn items(&self, name: &str) -> Vec<Item> {
    self.get(name).cloned().map(ParamValue::into_items).unwrap_or_default()
  }

  pub fn strings(&self, name: &str) -> Vec<String> {
    match self.get(name) {
      Some(ParamValue::Strings(values)) => values.clone(),
      Some(other) => other.clone().into_items().into_iter().map(|i| i.spec).collect(),
      None => Vec::new(),
    }
  }
}
