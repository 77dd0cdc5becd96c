//! Target dependency analysis.
//!
//! Classifies a target from its declared inputs and outputs:
//!
//! - `Inputs` or `Outputs` not declared: the target always runs in full
//! - declared but expanding to no items: nothing to do, the target is skipped
//! - every output is a transform of an input item list (`@(Compile->'%(Filename).obj')`):
//!   items are correlated one-to-one and only the stale ones are rebuilt
//! - anything else: all inputs are compared against all outputs

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use tracing::{debug, trace};

use crate::eval::{EvalContext, ListPart, expand_items, parse_list};
use crate::project::{Item, TargetDef};
use crate::util::path::resolve_against;

use super::check::{Pairing, Staleness, is_out_of_date};

/// Last-modified times for files. `None` means the file does not exist.
pub trait TimestampSource: Send + Sync {
  fn modified(&self, path: &Path) -> Option<SystemTime>;
}

/// Reads timestamps from the filesystem.
#[derive(Debug, Default, Clone)]
pub struct DiskTimestamps;

impl TimestampSource for DiskTimestamps {
  fn modified(&self, path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
  }
}

/// Timestamps kept in memory.
#[derive(Debug, Default)]
pub struct MemoryTimestamps {
  files: Mutex<HashMap<PathBuf, SystemTime>>,
}

impl MemoryTimestamps {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(&self, path: impl Into<PathBuf>, time: SystemTime) {
    self
      .files
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(path.into(), time);
  }

  pub fn remove(&self, path: &Path) {
    self.files.lock().unwrap_or_else(PoisonError::into_inner).remove(path);
  }
}

impl TimestampSource for MemoryTimestamps {
  fn modified(&self, path: &Path) -> Option<SystemTime> {
    self.files.lock().unwrap_or_else(PoisonError::into_inner).get(path).copied()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyAnalysis {
  /// Outputs are up to date.
  Skip,
  /// Inputs or outputs are declared but expand to nothing.
  SkipNoItems,
  FullBuild { reason: String },
  /// Only `changed` items are stale; `up_to_date` holds the rest, per item type.
  IncrementalBuild {
    changed: BTreeMap<String, Vec<Item>>,
    up_to_date: BTreeMap<String, Vec<Item>>,
  },
}

fn stamps(items: &[Item], ctx: &dyn EvalContext, timestamps: &dyn TimestampSource) -> Vec<Option<SystemTime>> {
  items
    .iter()
    .map(|item| timestamps.modified(&resolve_against(ctx.base_dir(), &item.spec)))
    .collect()
}

/// Classify `target` for execution.
pub fn analyze(target: &TargetDef, ctx: &dyn EvalContext, timestamps: &dyn TimestampSource) -> DependencyAnalysis {
  let (inputs_expr, outputs_expr) = match (target.inputs.as_deref(), target.outputs.as_deref()) {
    (Some(i), Some(o)) if !i.trim().is_empty() && !o.trim().is_empty() => (i, o),
    _ => {
      return DependencyAnalysis::FullBuild {
        reason: "inputs and outputs are not both declared".into(),
      };
    }
  };

  let all_inputs = expand_items(inputs_expr, ctx);
  let all_outputs = expand_items(outputs_expr, ctx);
  if all_inputs.is_empty() || all_outputs.is_empty() {
    debug!(target_name = %target.name, "inputs or outputs expand to no items");
    return DependencyAnalysis::SkipNoItems;
  }

  let input_parts = parse_list(inputs_expr);
  let output_parts = parse_list(outputs_expr);

  let vectors: BTreeSet<&str> = input_parts
    .iter()
    .filter_map(|part| match part {
      ListPart::Items {
        item_type,
        transform: None,
      } => Some(item_type.as_str()),
      _ => None,
    })
    .collect();

  let transforms: Option<Vec<(&str, &str)>> = output_parts
    .iter()
    .map(|part| match part {
      ListPart::Items {
        item_type,
        transform: Some(template),
      } if vectors.contains(item_type.as_str()) => Some((item_type.as_str(), template.as_str())),
      _ => None,
    })
    .collect();

  let Some(transforms) = transforms else {
    return compare_all(target, &all_inputs, &all_outputs, ctx, timestamps);
  };

  // Input parts not correlated with any output count against every output.
  let correlated: BTreeSet<&str> = transforms.iter().map(|(t, _)| *t).collect();
  let mut discrete = Vec::new();
  for part in &input_parts {
    let is_correlated = matches!(
      part,
      ListPart::Items { item_type, transform: None } if correlated.contains(item_type.as_str())
    );
    if !is_correlated {
      discrete.extend(expand_items(&list_expr(part), ctx));
    }
  }
  if !discrete.is_empty() {
    let staleness = is_out_of_date(
      &stamps(&discrete, ctx, timestamps),
      &stamps(&all_outputs, ctx, timestamps),
      Pairing::AllToAll,
    );
    if let Staleness::Stale { reason, .. } = staleness {
      return DependencyAnalysis::FullBuild { reason };
    }
  }

  let mut changed_by_type: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
  for (item_type, template) in &transforms {
    let items = ctx.items(item_type);
    let outputs = expand_items(&format!("@({}->'{}')", item_type, template), ctx);
    let staleness = is_out_of_date(
      &stamps(&items, ctx, timestamps),
      &stamps(&outputs, ctx, timestamps),
      Pairing::ByIndex,
    );
    match staleness {
      Staleness::UpToDate => {}
      Staleness::Stale {
        partitionable: false,
        reason,
        ..
      } => return DependencyAnalysis::FullBuild { reason },
      Staleness::Stale { changed, reason, .. } => {
        trace!(target_name = %target.name, item_type = %item_type, reason = %reason, "stale items");
        changed_by_type.entry(item_type.to_string()).or_default().extend(changed);
      }
    }
  }

  if changed_by_type.is_empty() {
    return DependencyAnalysis::Skip;
  }

  let mut changed = BTreeMap::new();
  let mut up_to_date = BTreeMap::new();
  for item_type in &correlated {
    let items = ctx.items(item_type);
    let stale = changed_by_type.get(*item_type).cloned().unwrap_or_default();
    let (stale_items, fresh_items): (Vec<_>, Vec<_>) =
      items.into_iter().enumerate().partition(|(i, _)| stale.contains(i));
    changed.insert(item_type.to_string(), stale_items.into_iter().map(|(_, item)| item).collect::<Vec<_>>());
    up_to_date.insert(item_type.to_string(), fresh_items.into_iter().map(|(_, item)| item).collect::<Vec<_>>());
  }

  if up_to_date.values().all(Vec::is_empty) {
    return DependencyAnalysis::FullBuild {
      reason: "all items are out of date".into(),
    };
  }

  debug!(
    target_name = %target.name,
    stale = changed.values().map(Vec::len).sum::<usize>(),
    fresh = up_to_date.values().map(Vec::len).sum::<usize>(),
    "incremental build"
  );
  DependencyAnalysis::IncrementalBuild { changed, up_to_date }
}

/// Render a parsed part back into an expression.
fn list_expr(part: &ListPart) -> String {
  match part {
    ListPart::Items {
      item_type,
      transform: None,
    } => format!("@({})", item_type),
    ListPart::Items {
      item_type,
      transform: Some(template),
    } => format!("@({}->'{}')", item_type, template),
    ListPart::Literal(text) => text.clone(),
  }
}

fn compare_all(
  target: &TargetDef,
  inputs: &[Item],
  outputs: &[Item],
  ctx: &dyn EvalContext,
  timestamps: &dyn TimestampSource,
) -> DependencyAnalysis {
  match is_out_of_date(
    &stamps(inputs, ctx, timestamps),
    &stamps(outputs, ctx, timestamps),
    Pairing::AllToAll,
  ) {
    Staleness::UpToDate => {
      debug!(target_name = %target.name, "outputs are up to date");
      DependencyAnalysis::Skip
    }
    Staleness::Stale { reason, .. } => DependencyAnalysis::FullBuild { reason },
  }
}
