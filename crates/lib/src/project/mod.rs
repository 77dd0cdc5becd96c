//! The evaluated project model and the loader seam to the evaluation layer.

mod loader;
mod types;

pub use loader::{InMemoryProjectLoader, JsonProjectLoader, LoadError, ProjectLoader};
pub use types::{ContinueOnError, EvaluatedProject, Item, ProjectInstance, TargetDef, TaskInvocation, TaskOutput};
