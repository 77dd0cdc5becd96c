//! Targets currently being built.
//!
//! At most one request builds a given `(configuration, target)` pair at a time. The
//! owner holds a [`ClaimGuard`]; everyone else gets a receiver that fires when the
//! guard is completed or dropped, and then checks the results cache again.
//!
//! A waiter's edge in the [`WaitGraph`] lives exactly as long as the claim it waits
//! on: it is added under the entry lock and removed when the claim is released, before
//! the owner can go on to wait for anything else.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;
use tracing::trace;

use crate::cache::ConfigurationId;

use super::types::RequestId;
use super::wait_graph::WaitGraph;

type Key = (ConfigurationId, String);

#[derive(Debug)]
struct InFlight {
  owner: RequestId,
  waiters: Vec<RequestId>,
  done: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct InFlightTargets {
  entries: Arc<DashMap<Key, InFlight>>,
  waits: Arc<WaitGraph>,
}

#[derive(Debug)]
pub enum Claim {
  Owned(ClaimGuard),
  /// Another request is building the target.
  Busy {
    owner: RequestId,
    done: watch::Receiver<bool>,
  },
  /// Waiting for `owner` would close a cycle of requests. `chain` starts and ends at the requester.
  Deadlock { owner: RequestId, chain: Vec<RequestId> },
}

impl InFlightTargets {
  pub fn new(waits: Arc<WaitGraph>) -> Self {
    Self {
      entries: Arc::new(DashMap::new()),
      waits,
    }
  }

  pub fn claim(&self, config: ConfigurationId, target: &str, requester: RequestId) -> Claim {
    let key = (config, target.to_string());
    match self.entries.entry(key.clone()) {
      Entry::Occupied(mut entry) => {
        let inflight = entry.get_mut();
        let owner = inflight.owner;
        if let Err(chain) = self.waits.add_wait(requester, owner) {
          return Claim::Deadlock { owner, chain };
        }
        if !inflight.waiters.contains(&requester) {
          inflight.waiters.push(requester);
        }
        Claim::Busy {
          owner,
          done: inflight.done.subscribe(),
        }
      }
      Entry::Vacant(entry) => {
        let (done, _) = watch::channel(false);
        entry.insert(InFlight {
          owner: requester,
          waiters: Vec::new(),
          done,
        });
        trace!(config = %config, target_name = target, request = %requester, "claimed target");
        Claim::Owned(ClaimGuard {
          entries: self.entries.clone(),
          waits: self.waits.clone(),
          key,
          completed: false,
        })
      }
    }
  }

  pub fn owner(&self, config: ConfigurationId, target: &str) -> Option<RequestId> {
    self.entries.get(&(config, target.to_string())).map(|e| e.owner)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

/// Exclusive right to build one target. Releasing it wakes every waiter.
#[derive(Debug)]
pub struct ClaimGuard {
  entries: Arc<DashMap<Key, InFlight>>,
  waits: Arc<WaitGraph>,
  key: Key,
  completed: bool,
}

impl ClaimGuard {
  /// Release after the result has been recorded.
  pub fn complete(mut self) {
    self.completed = true;
    self.release();
  }

  fn release(&mut self) {
    if let Some((_, inflight)) = self.entries.remove(&self.key) {
      for waiter in &inflight.waiters {
        self.waits.remove_wait(*waiter, inflight.owner);
      }
      inflight.done.send_replace(true);
    }
  }
}

impl Drop for ClaimGuard {
  fn drop(&mut self) {
    if !self.completed {
      trace!(config = %self.key.0, target_name = %self.key.1, "abandoned target claim");
      self.release();
    }
  }
}

/// Wait until a busy target's owner releases it.
pub async fn wait_for_release(mut done: watch::Receiver<bool>) {
  let _ = done.wait_for(|released| *released).await;
}
