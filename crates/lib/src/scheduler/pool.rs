//! Worker pool.
//!
//! A request holds one slot while it executes targets. A slot is given back only
//! while the request waits: for a nested request's result, or for a target that
//! another request is building. Nested requests can therefore outnumber the pool
//! without deadlocking it.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("worker pool is closed")]
pub struct PoolClosed;

#[derive(Debug, Clone)]
pub struct WorkerPool {
  semaphore: Arc<Semaphore>,
  size: usize,
}

impl WorkerPool {
  /// A pool of `size` slots. Zero is treated as one.
  pub fn new(size: usize) -> Self {
    let size = size.max(1);
    Self {
      semaphore: Arc::new(Semaphore::new(size)),
      size,
    }
  }

  pub fn size(&self) -> usize {
    self.size
  }

  pub fn available(&self) -> usize {
    self.semaphore.available_permits()
  }

  pub async fn acquire(&self) -> Result<WorkerSlot, PoolClosed> {
    let permit = self.semaphore.clone().acquire_owned().await.map_err(|_| PoolClosed)?;
    Ok(WorkerSlot {
      semaphore: self.semaphore.clone(),
      permit: Mutex::new(Some(permit)),
    })
  }

  /// Fail every pending and future acquire.
  pub fn close(&self) {
    self.semaphore.close();
  }
}

/// A held worker slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct WorkerSlot {
  semaphore: Arc<Semaphore>,
  permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl WorkerSlot {
  pub fn is_held(&self) -> bool {
    self.permit.lock().unwrap_or_else(PoisonError::into_inner).is_some()
  }

  /// Give the slot back, wait for `fut`, then take a slot again.
  ///
  /// The output of `fut` is returned even when it completes; only reacquiring can fail.
  pub async fn release_then_block_then_reacquire<F>(&self, fut: F) -> Result<F::Output, PoolClosed>
  where
    F: Future,
  {
    let released = self.permit.lock().unwrap_or_else(PoisonError::into_inner).take();
    drop(released);
    trace!("released worker slot");

    let output = fut.await;

    let permit = self.semaphore.clone().acquire_owned().await.map_err(|_| PoolClosed)?;
    *self.permit.lock().unwrap_or_else(PoisonError::into_inner) = Some(permit);
    trace!("reacquired worker slot");
    Ok(output)
  }
}
