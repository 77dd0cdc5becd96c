//! Task registry.
//!
//! Task types are registered once with their schema and a factory. Lookup is by
//! task name, ASCII case-insensitive.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::builtins;
use super::types::{Task, TaskSchema};

pub(crate) type TaskFactory = Arc<dyn Fn() -> Box<dyn Task> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
  #[error("task \"{0}\" is already registered")]
  DuplicateTask(String),

  #[error("task \"{task}\" declares parameter \"{param}\" twice")]
  DuplicateParameter { task: String, param: String },
}

#[derive(Clone)]
pub struct TaskRegistration {
  schema: TaskSchema,
  factory: TaskFactory,
}

impl TaskRegistration {
  pub fn schema(&self) -> &TaskSchema {
    &self.schema
  }

  pub fn create(&self) -> Box<dyn Task> {
    (self.factory)()
  }
}

impl std::fmt::Debug for TaskRegistration {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TaskRegistration").field("schema", &self.schema).finish()
  }
}

#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
  tasks: HashMap<String, TaskRegistration>,
}

impl TaskRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry holding the engine tasks.
  pub fn with_builtins() -> Self {
    let mut registry = Self::new();
    for (schema, factory) in builtins::all() {
      // Builtin schemas are distinct and well-formed.
      let _ = registry.register_factory(schema, factory);
    }
    registry
  }

  pub fn register<F>(&mut self, schema: TaskSchema, factory: F) -> Result<(), RegistryError>
  where
    F: Fn() -> Box<dyn Task> + Send + Sync + 'static,
  {
    self.register_factory(schema, Arc::new(factory))
  }

  fn register_factory(&mut self, schema: TaskSchema, factory: TaskFactory) -> Result<(), RegistryError> {
    let key = schema.name().to_ascii_lowercase();
    if self.tasks.contains_key(&key) {
      return Err(RegistryError::DuplicateTask(schema.name().to_string()));
    }
    if let Some(param) = schema.duplicate() {
      return Err(RegistryError::DuplicateParameter {
        task: schema.name().to_string(),
        param: param.to_string(),
      });
    }
    self.tasks.insert(key, TaskRegistration { schema, factory });
    Ok(())
  }

  pub fn get(&self, name: &str) -> Option<&TaskRegistration> {
    self.tasks.get(&name.to_ascii_lowercase())
  }

  pub fn contains(&self, name: &str) -> bool {
    self.get(name).is_some()
  }

  /// Registered task names, sorted.
  pub fn names(&self) -> Vec<&str> {
    let mut names: Vec<&str> = self.tasks.values().map(|r| r.schema.name()).collect();
    names.sort_unstable();
    names
  }
}
