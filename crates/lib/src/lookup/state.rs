use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::project::{Item, ProjectInstance};

use super::ScopeChanges;

/// Committed items and properties of one configuration.
///
/// Shared as `Arc<ProjectState>` by every lookup reading it; commits go through
/// `Arc::make_mut`, so readers holding an older snapshot are unaffected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectState {
  pub directory: PathBuf,
  pub properties: BTreeMap<String, String>,
  pub items: BTreeMap<String, Vec<Item>>,
}

impl ProjectState {
  pub fn from_instance(instance: &ProjectInstance) -> Self {
    Self {
      directory: instance.directory(),
      properties: instance.properties.clone(),
      items: instance.items.clone(),
    }
  }

  /// Commit a lookup's net writes.
  pub fn apply(&mut self, changes: ScopeChanges) {
    self.properties.extend(changes.properties);
    for (item_type, removed) in changes.removed {
      if let Some(items) = self.items.get_mut(&item_type) {
        for item in &removed {
          if let Some(pos) = items.iter().position(|i| i == item) {
            items.remove(pos);
          }
        }
      }
    }
    for (item_type, added) in changes.added {
      self.items.entry(item_type).or_default().extend(added);
    }
  }
}
