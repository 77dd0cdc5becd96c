//! Incremental build support.
//!
//! [`is_out_of_date`] is the pure timestamp comparison; [`analyze`] applies it to a
//! target's declared inputs and outputs and decides between skipping, a full build and
//! an incremental build of the stale items only.

mod analyze;
mod check;

pub use analyze::{DependencyAnalysis, DiskTimestamps, MemoryTimestamps, TimestampSource, analyze};
pub use check::{Pairing, Staleness, is_out_of_date};
