//! Tasks: the units of work inside a target.
//!
//! A task type is registered with a [`TaskSchema`] and a factory. For each invocation
//! the executor creates a fresh instance, binds its expanded parameters, runs it with a
//! [`TaskHost`] and publishes its declared outputs into the target's lookup.

mod builtins;
mod execute;
mod host;
mod registry;
mod types;

pub use builtins::{
  ADDITIONAL_PROPERTIES_METADATA, BuildProjectTask, CallTargetTask, ErrorTask, MessageTask, SOURCE_PROJECT_METADATA,
  TouchTask, WarningTask,
};
pub use execute::TaskOutcome;
pub(crate) use execute::execute_task;
pub use host::TaskHost;
pub use registry::{RegistryError, TaskRegistration, TaskRegistry};
pub use types::{ParamBag, ParamError, ParamSpec, ParamType, ParamValue, Task, TaskError, TaskSchema};
