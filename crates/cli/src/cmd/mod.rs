mod build;
mod cache;

pub use build::{BuildArgs, cmd_build};
pub use cache::{CacheCommand, cmd_cache};
