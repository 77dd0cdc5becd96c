//! Shared utilities.

pub mod path;
