//! Target execution.
//!
//! [`TargetExecutor`] runs one target's lifecycle; [`build_targets`] walks the target
//! graph for a request, honoring `DependsOnTargets`, `BeforeTargets`,
//! `AfterTargets` and `OnError`.

mod execute;
mod graph;
mod types;

pub use execute::{ExecutionEnv, TargetExecutor, TargetOutcome, TargetState};
pub use graph::{GraphOutcome, build_targets};
pub use types::{TargetResult, TargetResultCode, WorkUnit, WorkUnitAction, WorkUnitResult};
