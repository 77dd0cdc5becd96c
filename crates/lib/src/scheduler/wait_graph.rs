//! Cross-request waits.
//!
//! An edge `a -> b` means request `a` is blocked until request `b` makes progress:
//! a parent waiting on a nested request, or a request waiting on a target another
//! request is building. Adding an edge that closes a cycle is refused, so a wait
//! that could never end is reported instead of hanging.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use tracing::{debug, warn};

use super::types::RequestId;

#[derive(Debug, Default)]
struct Inner {
  graph: StableDiGraph<RequestId, ()>,
  nodes: HashMap<RequestId, NodeIndex>,
  labels: HashMap<RequestId, String>,
}

impl Inner {
  fn node(&mut self, id: RequestId) -> NodeIndex {
    if let Some(&idx) = self.nodes.get(&id) {
      return idx;
    }
    let idx = self.graph.add_node(id);
    self.nodes.insert(id, idx);
    idx
  }

  /// Shortest chain of waits from `from` to `to`, both included.
  fn path(&self, from: NodeIndex, to: NodeIndex) -> Vec<RequestId> {
    let mut previous: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut queue = VecDeque::from([from]);
    while let Some(node) = queue.pop_front() {
      if node == to {
        break;
      }
      for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
        if next != from && !previous.contains_key(&next) {
          previous.insert(next, node);
          queue.push_back(next);
        }
      }
    }

    let mut chain = vec![self.graph[to]];
    let mut current = to;
    while current != from {
      match previous.get(&current) {
        Some(&prev) => {
          chain.push(self.graph[prev]);
          current = prev;
        }
        None => break,
      }
    }
    chain.reverse();
    chain
  }

  fn prune(&mut self, id: RequestId) {
    if let Some(&idx) = self.nodes.get(&id)
      && self.graph.neighbors_undirected(idx).next().is_none()
    {
      self.graph.remove_node(idx);
      self.nodes.remove(&id);
    }
  }
}

#[derive(Debug, Default)]
pub struct WaitGraph {
  inner: Mutex<Inner>,
}

impl WaitGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Name a request for diagnostics.
  pub fn register(&self, id: RequestId, label: impl Into<String>) {
    self.lock().labels.insert(id, label.into());
  }

  pub fn unregister(&self, id: RequestId) {
    let mut inner = self.lock();
    inner.labels.remove(&id);
    if let Some(idx) = inner.nodes.remove(&id) {
      inner.graph.remove_node(idx);
    }
  }

  /// Record that `waiter` blocks on `owner`.
  ///
  /// Returns the cycle, starting and ending at `waiter`, if the wait would close one.
  pub fn add_wait(&self, waiter: RequestId, owner: RequestId) -> Result<(), Vec<RequestId>> {
    let mut inner = self.lock();
    if waiter == owner {
      return Err(vec![waiter, owner]);
    }

    let from = inner.node(waiter);
    let to = inner.node(owner);
    if has_path_connecting(&inner.graph, to, from, None) {
      let mut chain = vec![waiter];
      chain.extend(inner.path(to, from));
      warn!(waiter = %waiter, owner = %owner, "wait would form a cycle");
      inner.prune(waiter);
      inner.prune(owner);
      return Err(chain);
    }

    inner.graph.update_edge(from, to, ());
    debug!(waiter = %waiter, owner = %owner, "request waiting");
    Ok(())
  }

  pub fn remove_wait(&self, waiter: RequestId, owner: RequestId) {
    let mut inner = self.lock();
    let (Some(&from), Some(&to)) = (inner.nodes.get(&waiter), inner.nodes.get(&owner)) else {
      return;
    };
    if let Some(edge) = inner.graph.find_edge(from, to) {
      inner.graph.remove_edge(edge);
    }
    inner.prune(waiter);
    inner.prune(owner);
  }

  /// Render a chain of requests with their labels.
  pub fn describe(&self, chain: &[RequestId]) -> Vec<String> {
    let inner = self.lock();
    chain
      .iter()
      .map(|id| match inner.labels.get(id) {
        Some(label) => format!("{} (request {})", label, id),
        None => format!("request {}", id),
      })
      .collect()
  }

  pub fn edge_count(&self) -> usize {
    self.lock().graph.edge_count()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }
}
