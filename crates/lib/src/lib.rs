//! kiln-lib: build backend for kiln
//!
//! This crate turns an already-evaluated project description into executed targets:
//! - `project` / `eval` / `lookup`: project model, expansion, conditions, property and item state
//! - `cache`: configuration interning, per-target results, results cache files
//! - `incremental`: timestamp-based up-to-date analysis
//! - `task` / `target`: task and target execution state machines
//! - `scheduler`: request coordination, worker pool, cross-request waits
//! - `session`: build session lifecycle and parameters
//! - `events`: build events and sinks

pub mod cache;
pub mod consts;
pub mod eval;
pub mod events;
pub mod incremental;
pub mod lookup;
pub mod project;
pub mod scheduler;
pub mod session;
pub mod target;
pub mod task;
pub mod util;
