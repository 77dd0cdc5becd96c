//! Scoped item/property view.
//!
//! A `Lookup` layers a stack of scopes over a shared, immutable `ProjectState`.
//! Reads fall through from the top scope to the base; writes always land in the top
//! scope. A scope's writes become visible to its parent only through `merge_scope`
//! and disappear with `discard_scope`. The outermost scope is turned into a
//! `ScopeChanges` value that the owner commits back into the configuration's state.
//!
//! Lookups are never shared: each target invocation creates one and owns it.

mod state;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use tracing::trace;

use crate::eval::EvalContext;
use crate::project::Item;

pub use state::ProjectState;

/// Proof that a scope was entered; consumed when the scope is merged or discarded.
#[must_use = "a scope must be merged or discarded"]
#[derive(Debug)]
pub struct ScopeToken {
  depth: usize,
}

#[derive(Debug, Default, Clone)]
struct Scope {
  properties: HashMap<String, String>,
  added: HashMap<String, Vec<Item>>,
  removed: HashMap<String, Vec<Item>>,
}

impl Scope {
  fn add_item(&mut self, item_type: &str, item: Item) {
    self.added.entry(item_type.to_string()).or_default().push(item);
  }

  fn remove_item(&mut self, item_type: &str, item: &Item) {
    if let Some(added) = self.added.get_mut(item_type)
      && let Some(pos) = added.iter().position(|i| i == item)
    {
      added.remove(pos);
      return;
    }
    self.removed.entry(item_type.to_string()).or_default().push(item.clone());
  }

  fn apply_items(&self, item_type: &str, items: &mut Vec<Item>) {
    if let Some(removed) = self.removed.get(item_type) {
      for item in removed {
        if let Some(pos) = items.iter().position(|i| i == item) {
          items.remove(pos);
        }
      }
    }
    if let Some(added) = self.added.get(item_type) {
      items.extend(added.iter().cloned());
    }
  }

  /// Fold a child scope into this one.
  fn absorb(&mut self, child: Scope) {
    self.properties.extend(child.properties);
    for (item_type, removed) in child.removed {
      for item in removed {
        self.remove_item(&item_type, &item);
      }
    }
    for (item_type, added) in child.added {
      self.added.entry(item_type).or_default().extend(added);
    }
  }
}

/// Net writes of a lookup, ready to be committed to a `ProjectState`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScopeChanges {
  pub properties: BTreeMap<String, String>,
  pub added: BTreeMap<String, Vec<Item>>,
  pub removed: BTreeMap<String, Vec<Item>>,
}

impl ScopeChanges {
  pub fn is_empty(&self) -> bool {
    self.properties.is_empty() && self.added.is_empty() && self.removed.is_empty()
  }
}

/// A scoped, copy-on-write view over a project's items and properties.
#[derive(Debug)]
pub struct Lookup {
  base: Arc<ProjectState>,
  /// Read-only replacements for whole item types; never committed.
  masks: HashMap<String, Vec<Item>>,
  scopes: Vec<Scope>,
}

impl Lookup {
  pub fn new(base: Arc<ProjectState>) -> Self {
    Self {
      base,
      masks: HashMap::new(),
      scopes: vec![Scope::default()],
    }
  }

  pub fn depth(&self) -> usize {
    self.scopes.len()
  }

  pub fn enter_scope(&mut self) -> ScopeToken {
    self.scopes.push(Scope::default());
    trace!(depth = self.scopes.len(), "entered lookup scope");
    ScopeToken {
      depth: self.scopes.len(),
    }
  }

  fn pop_checked(&mut self, token: ScopeToken) -> Scope {
    assert_eq!(
      token.depth,
      self.scopes.len(),
      "lookup scopes must be closed innermost first"
    );
    assert!(token.depth > 1, "the outermost lookup scope cannot be popped");
    self.scopes.pop().unwrap_or_default()
  }

  /// Drop everything written in the scope.
  pub fn discard_scope(&mut self, token: ScopeToken) {
    let _ = self.pop_checked(token);
  }

  /// Make the scope's writes visible to its parent.
  pub fn merge_scope(&mut self, token: ScopeToken) {
    let child = self.pop_checked(token);
    if let Some(parent) = self.scopes.last_mut() {
      parent.absorb(child);
    }
  }

  /// Present `items` in place of the real item list for `item_type` until cleared.
  ///
  /// Used to offer only the stale partition to an incremental target's tasks.
  pub fn set_item_mask(&mut self, item_type: &str, items: Vec<Item>) {
    self.masks.insert(item_type.to_string(), items);
  }

  pub fn clear_item_masks(&mut self) {
    self.masks.clear();
  }

  pub fn property(&self, name: &str) -> Option<String> {
    for scope in self.scopes.iter().rev() {
      if let Some(value) = scope.properties.get(name) {
        return Some(value.clone());
      }
    }
    self.base.properties.get(name).cloned()
  }

  pub fn items(&self, item_type: &str) -> Vec<Item> {
    let mut items = match self.masks.get(item_type) {
      Some(masked) => masked.clone(),
      None => self.base.items.get(item_type).cloned().unwrap_or_default(),
    };
    for scope in &self.scopes {
      scope.apply_items(item_type, &mut items);
    }
    items
  }

  pub fn set_property(&mut self, name: &str, value: impl Into<String>) {
    self.top().properties.insert(name.to_string(), value.into());
  }

  pub fn add_item(&mut self, item_type: &str, item: Item) {
    self.top().add_item(item_type, item);
  }

  pub fn remove_item(&mut self, item_type: &str, item: &Item) {
    self.top().remove_item(item_type, item);
  }

  fn top(&mut self) -> &mut Scope {
    if self.scopes.is_empty() {
      self.scopes.push(Scope::default());
    }
    let last = self.scopes.len() - 1;
    &mut self.scopes[last]
  }

  /// Consume the lookup and return the outermost scope's writes.
  ///
  /// Panics if inner scopes are still open.
  pub fn into_changes(mut self) -> ScopeChanges {
    assert_eq!(self.scopes.len(), 1, "inner lookup scopes are still open");
    let root = self.scopes.pop().unwrap_or_default();
    ScopeChanges {
      properties: root.properties.into_iter().collect(),
      added: root.added.into_iter().filter(|(_, v)| !v.is_empty()).collect(),
      removed: root.removed.into_iter().filter(|(_, v)| !v.is_empty()).collect(),
    }
  }
}

impl EvalContext for Lookup {
  fn property(&self, name: &str) -> Option<String> {
    Lookup::property(self, name)
  }

  fn items(&self, item_type: &str) -> Vec<Item> {
    Lookup::items(self, item_type)
  }

  fn base_dir(&self) -> &Path {
    &self.base.directory
  }
}
