//! Request scheduling.
//!
//! The [`Coordinator`] turns request data into configurations, runs each request on
//! its own tokio task under the [`WorkerPool`], and serves nested requests from the
//! results cache when it can.

mod cancel;
mod context;
mod coordinator;
mod inflight;
mod pool;
mod types;
mod wait_graph;

pub use cancel::CancellationToken;
pub use context::{SessionContext, TopLevelBuild};
pub use coordinator::{Coordinator, RequestFrame};
pub use inflight::{Claim, ClaimGuard, InFlightTargets, wait_for_release};
pub use pool::{PoolClosed, WorkerPool, WorkerSlot};
pub use types::{BuildError, BuildRequest, BuildRequestData, BuildResult, RequestId, SubmissionId};
pub use wait_graph::WaitGraph;
