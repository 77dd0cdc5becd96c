//! Execution-time expression evaluation.
//!
//! Static evaluation happens before a project reaches the backend. What remains are the
//! expressions that depend on execution state: property and item references in task
//! parameters, target inputs/outputs, and conditions.
//!
//! Supported forms:
//! - `$(Name)` property reference (missing properties expand to the empty string)
//! - `@(Type)` item list reference
//! - `@(Type->'%(Filename).obj')` item transform using `%(Metadata)`
//! - conditions: `'a' == 'b'`, `'a' != 'b'`, `Exists('path')`, `true`, `false`, `!`, `and`, `or`, parentheses

mod condition;
mod expand;

use std::path::Path;

use crate::project::Item;

pub use condition::{ConditionError, evaluate_condition};
pub use expand::{ListPart, expand_items, expand_string, parse_list, transform_item};

/// Read access to the properties and items an expression can reference.
pub trait EvalContext {
  fn property(&self, name: &str) -> Option<String>;
  fn items(&self, item_type: &str) -> Vec<Item>;
  /// Directory relative paths are resolved against.
  fn base_dir(&self) -> &Path;
}
