//! Target result types.

use serde::{Deserialize, Serialize};

use crate::project::Item;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetResultCode {
  Success,
  Failure,
  Skipped,
}

/// Whether dependents may keep going after this target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkUnitAction {
  Continue,
  Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkUnitResult {
  Success,
  Failed,
  Skipped,
}

/// Aggregated outcome of a target's work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkUnit {
  pub action: WorkUnitAction,
  pub result: WorkUnitResult,
}

/// The recorded result of one target for one configuration.
///
/// Items are owned by the result; consumers receive clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetResult {
  pub code: TargetResultCode,
  #[serde(default)]
  pub items: Vec<Item>,
  pub work_unit: WorkUnit,
}

impl TargetResult {
  pub fn success(items: Vec<Item>) -> Self {
    Self {
      code: TargetResultCode::Success,
      items,
      work_unit: WorkUnit {
        action: WorkUnitAction::Continue,
        result: WorkUnitResult::Success,
      },
    }
  }

  pub fn skipped() -> Self {
    Self {
      code: TargetResultCode::Skipped,
      items: Vec::new(),
      work_unit: WorkUnit {
        action: WorkUnitAction::Continue,
        result: WorkUnitResult::Skipped,
      },
    }
  }

  pub fn failure(action: WorkUnitAction) -> Self {
    Self {
      code: TargetResultCode::Failure,
      items: Vec::new(),
      work_unit: WorkUnit {
        action,
        result: WorkUnitResult::Failed,
      },
    }
  }

  /// Failed, but dependents may still run.
  pub fn failure_continue(items: Vec<Item>) -> Self {
    Self {
      items,
      ..Self::failure(WorkUnitAction::Continue)
    }
  }

  pub fn is_failure(&self) -> bool {
    self.code == TargetResultCode::Failure
  }

  pub fn should_stop(&self) -> bool {
    self.work_unit.action == WorkUnitAction::Stop
  }
}
