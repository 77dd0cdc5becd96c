//! Library integration tests: whole sessions over in-memory projects.

mod cache_tests;
mod common;
mod graph_tests;
mod incremental_tests;
mod scheduling_tests;
