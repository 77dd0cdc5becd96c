//! Results cache.
//!
//! Per configuration, the results of every target built so far. Entries only grow:
//! a later request for a superset of targets reuses earlier work, and a target that
//! already has a result is never re-executed within the session.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::target::TargetResult;

use super::config::ConfigurationId;

/// Everything recorded for one configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigResults {
  pub targets: BTreeMap<String, TargetResult>,
  #[serde(default)]
  pub default_targets: Vec<String>,
}

/// The split between cached and uncached targets of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedLookup {
  pub found: BTreeMap<String, TargetResult>,
  /// Requested targets without a result, in request order.
  pub missing: Vec<String>,
}

impl CachedLookup {
  pub fn is_complete(&self) -> bool {
    self.missing.is_empty()
  }
}

#[derive(Debug, Default)]
pub struct ResultsCache {
  entries: DashMap<ConfigurationId, ConfigResults>,
}

impl ResultsCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record a target result. The first result for a target wins.
  ///
  /// Returns `false` if a result was already present.
  pub fn add_result(&self, config: ConfigurationId, target: &str, result: TargetResult) -> bool {
    let mut entry = self.entries.entry(config).or_default();
    if entry.targets.contains_key(target) {
      debug!(config = %config, target_name = target, "result already recorded; keeping the first");
      return false;
    }
    trace!(config = %config, target_name = target, code = ?result.code, "recorded target result");
    entry.targets.insert(target.to_string(), result);
    true
  }

  /// Merge a batch of results, keeping existing entries.
  pub fn merge(&self, config: ConfigurationId, results: ConfigResults) {
    let mut entry = self.entries.entry(config).or_default();
    if entry.default_targets.is_empty() {
      entry.default_targets = results.default_targets;
    }
    for (name, result) in results.targets {
      entry.targets.entry(name).or_insert(result);
    }
  }

  /// Split `targets` into cached results and targets still to build.
  pub fn get_results(&self, config: ConfigurationId, targets: &[String]) -> CachedLookup {
    let mut lookup = CachedLookup::default();
    let entry = self.entries.get(&config);
    for name in targets {
      match entry.as_ref().and_then(|e| e.targets.get(name)) {
        Some(result) => {
          lookup.found.insert(name.clone(), result.clone());
        }
        None => {
          if !lookup.missing.contains(name) {
            lookup.missing.push(name.clone());
          }
        }
      }
    }
    lookup
  }

  pub fn has_result_for_target(&self, config: ConfigurationId, target: &str) -> bool {
    self
      .entries
      .get(&config)
      .is_some_and(|entry| entry.targets.contains_key(target))
  }

  pub fn target_result(&self, config: ConfigurationId, target: &str) -> Option<TargetResult> {
    self.entries.get(&config).and_then(|entry| entry.targets.get(target).cloned())
  }

  pub fn set_default_targets(&self, config: ConfigurationId, targets: Vec<String>) {
    self.entries.entry(config).or_default().default_targets = targets;
  }

  pub fn default_targets(&self, config: ConfigurationId) -> Option<Vec<String>> {
    self
      .entries
      .get(&config)
      .map(|entry| entry.default_targets.clone())
      .filter(|targets| !targets.is_empty())
  }

  /// Copy of everything recorded for a configuration.
  pub fn results_for(&self, config: ConfigurationId) -> Option<ConfigResults> {
    self.entries.get(&config).map(|entry| entry.value().clone())
  }

  pub fn configuration_ids(&self) -> Vec<ConfigurationId> {
    let mut ids: Vec<_> = self.entries.iter().map(|entry| *entry.key()).collect();
    ids.sort();
    ids
  }
}
