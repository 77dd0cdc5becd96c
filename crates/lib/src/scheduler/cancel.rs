//! Cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Observed at target and task boundaries only. Running tasks are never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
  cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::Release);
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::Acquire)
  }
}
