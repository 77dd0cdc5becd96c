//! Timestamp comparison.

use std::time::SystemTime;

/// How inputs are associated with outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pairing {
  /// Input `i` produces output `i`. The shorter list decides how many pairs exist.
  ByIndex,
  /// Every output depends on every input.
  AllToAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
  UpToDate,
  Stale {
    /// Indices into the input list that need rebuilding.
    changed: Vec<usize>,
    /// When false the stale set cannot be separated from the rest and everything rebuilds.
    partitionable: bool,
    reason: String,
  },
}

impl Staleness {
  pub fn is_up_to_date(&self) -> bool {
    matches!(self, Staleness::UpToDate)
  }

  fn full(len: usize, reason: impl Into<String>) -> Self {
    Staleness::Stale {
      changed: (0..len).collect(),
      partitionable: false,
      reason: reason.into(),
    }
  }
}

/// Decide whether `outputs` are up to date with respect to `inputs`.
///
/// `None` stands for a file that does not exist. Pure: the same arguments always
/// produce the same answer.
pub fn is_out_of_date(inputs: &[Option<SystemTime>], outputs: &[Option<SystemTime>], pairing: Pairing) -> Staleness {
  if inputs.is_empty() {
    return Staleness::full(0, "no inputs");
  }
  if outputs.is_empty() {
    return Staleness::full(inputs.len(), "no outputs");
  }

  match pairing {
    Pairing::AllToAll => all_to_all(inputs, outputs),
    Pairing::ByIndex => by_index(inputs, outputs),
  }
}

fn all_to_all(inputs: &[Option<SystemTime>], outputs: &[Option<SystemTime>]) -> Staleness {
  if let Some(i) = inputs.iter().position(Option::is_none) {
    return Staleness::full(inputs.len(), format!("input {} does not exist", i));
  }
  if let Some(i) = outputs.iter().position(Option::is_none) {
    return Staleness::full(inputs.len(), format!("output {} does not exist", i));
  }

  let newest_input = inputs.iter().flatten().max();
  let oldest_output = outputs.iter().flatten().min();
  match (newest_input, oldest_output) {
    (Some(input), Some(output)) if input > output => {
      Staleness::full(inputs.len(), "an input is newer than the oldest output")
    }
    _ => Staleness::UpToDate,
  }
}

fn by_index(inputs: &[Option<SystemTime>], outputs: &[Option<SystemTime>]) -> Staleness {
  let paired = inputs.len().min(outputs.len());
  let mut changed = Vec::new();
  let mut reason = None;

  for i in 0..paired {
    let why = match (inputs[i], outputs[i]) {
      (None, _) => Some("input does not exist"),
      (_, None) => Some("output does not exist"),
      (Some(input), Some(output)) if input > output => Some("input is newer than output"),
      _ => None,
    };
    if let Some(why) = why {
      reason.get_or_insert_with(|| format!("item {}: {}", i, why));
      changed.push(i);
    }
  }

  if inputs.len() > paired {
    reason.get_or_insert_with(|| format!("{} inputs have no matching output", inputs.len() - paired));
    changed.extend(paired..inputs.len());
  }

  let excess_outputs = outputs.len() > paired;
  if excess_outputs {
    reason.get_or_insert_with(|| format!("{} outputs have no matching input", outputs.len() - paired));
  }

  match reason {
    None => Staleness::UpToDate,
    Some(reason) => Staleness::Stale {
      changed,
      partitionable: !excess_outputs,
      reason,
    },
  }
}
