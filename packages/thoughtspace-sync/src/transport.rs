use async_trait::async_trait;

use thoughtspace_core::{ids::NodeId, ops::Operation, timestamp::Timestamp};

use crate::error::Result;

/// One chunk of the catch-up stream: the header snapshotted at request time plus the
/// operations it carries, ascending by `sync_timestamp`.
#[derive(Clone, Debug, Default)]
pub struct PullBatch {
    pub upper_limit: Option<Timestamp>,
    pub operations: Vec<Operation>,
}

/// A full hydration snapshot: every row of `nodes`, plus the entire `op_log`, written verbatim
/// with no replay required on the receiving end.
#[derive(Clone, Debug, Default)]
pub struct HydrationSnapshot {
    pub nodes: Vec<(NodeId, Option<NodeId>)>,
    pub operations: Vec<Operation>,
}

/// One message observed on the live broadcast subscription.
#[derive(Clone, Debug)]
pub struct LiveBatch {
    pub operations: Vec<Operation>,
}

/// Everything the Sync Coordinator needs from a connection to a Relay: push, catch-up, full
/// hydration, and the live broadcast feed. A real implementation wraps a WebSocket; tests
/// fake it so the state machine can be exercised without a running server.
#[async_trait]
pub trait Transport: Send {
    /// Send locally-originated operations; returns the Relay-assigned `sync_timestamp`
    /// applied to all of them.
    async fn push(&mut self, operations: Vec<Operation>) -> Result<Timestamp>;

    /// Request one chunk of the catch-up stream starting just after `cursor`.
    async fn pull_since(&mut self, cursor: Option<Timestamp>) -> Result<PullBatch>;

    /// Request a full binary hydration snapshot.
    async fn hydrate(&mut self) -> Result<HydrationSnapshot>;

    /// Wait for the next live broadcast batch, or `None` if the subscription ended.
    async fn recv_live(&mut self) -> Result<Option<LiveBatch>>;
}
