use std::collections::BTreeMap;

use crate::error::Result;
use crate::ids::NodeId;
use crate::ops::Operation;
use crate::timestamp::Timestamp;

/// The Operation Log Store (§4.1): an append-only, uniquely-keyed log of operations plus a
/// materialized `nodes` table caching the current parent pointer for every node.
///
/// Ground truth for the tree is the log; `nodes` can always be rebuilt from it (see
/// [`crate::engine::rebuild_nodes`]). Implementations must make `append` idempotent on
/// `timestamp` and keep `read_from`/`read_since_sync` gap-free and ascending.
pub trait LogStore {
    /// Append an operation. A duplicate `timestamp` is a no-op; returns whether a new row
    /// was actually inserted.
    fn append(&mut self, op: Operation) -> Result<bool>;

    /// All log entries with `timestamp >= from` (or all entries if `from` is `None`), in
    /// strict ascending `timestamp` order.
    fn read_from(&self, from: Option<&Timestamp>) -> Result<Vec<Operation>>;

    /// All log entries with `cursor < sync_timestamp <= upper_bound`, ascending. Entries whose
    /// `sync_timestamp` is still null (not yet observed by the Relay) are never returned.
    fn read_since_sync(
        &self,
        cursor: Option<&Timestamp>,
        upper_bound: Option<&Timestamp>,
    ) -> Result<Vec<Operation>>;

    /// Set `sync_timestamp` for a previously-appended operation. Null -> non-null, exactly once.
    fn mark_synced(&mut self, timestamp: &Timestamp, sync_timestamp: Timestamp) -> Result<()>;

    /// Current materialized parent of `node`, or `None` if the node has never been referenced.
    fn get_parent(&self, node: &NodeId) -> Result<Option<NodeId>>;

    /// Upsert the materialized parent of `node`, creating the row if it doesn't exist yet
    /// (the "unknown node reference" case is never fatal: the row is created implicitly with
    /// a null parent and becomes consistent once the creating operation is also seen).
    fn put_parent(&mut self, node: &NodeId, parent: Option<NodeId>) -> Result<()>;

    /// Every row of the materialized `nodes` table.
    fn all_nodes(&self) -> Result<Vec<(NodeId, Option<NodeId>)>>;

    /// Reset `nodes` to just the two reserved seed rows (`ROOT`, `TOMBSTONE`), both with a
    /// null parent. Used before a full rebuild-from-log.
    fn reset_nodes_to_seed(&mut self) -> Result<()>;

    /// Highest `timestamp` present in the log, if any.
    fn latest_timestamp(&self) -> Result<Option<Timestamp>>;

    /// Discard the entire local replica: every `op_log` row and every `nodes` row except the
    /// reserved seeds. Used when recovering from irrecoverable local divergence, immediately
    /// before re-hydrating from the Relay.
    fn clear(&mut self) -> Result<()>;

    /// Run `f` with all-or-nothing semantics across log mutations and `nodes` updates.
    fn transaction<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
        Self: Sized,
    {
        f(self)
    }
}

/// In-memory, `BTreeMap`-backed log store for tests and prototyping. Mirrors the shape of a
/// real embedded store closely enough that engine tests exercise the same code paths.
#[derive(Default)]
pub struct MemoryLogStore {
    log: BTreeMap<Timestamp, Operation>,
    nodes: BTreeMap<NodeId, Option<NodeId>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        let mut store = Self::default();
        store.nodes.insert(NodeId::root(), None);
        store.nodes.insert(NodeId::tombstone(), None);
        store
    }
}

impl LogStore for MemoryLogStore {
    fn append(&mut self, op: Operation) -> Result<bool> {
        if self.log.contains_key(&op.timestamp) {
            return Ok(false);
        }
        self.log.insert(op.timestamp.clone(), op);
        Ok(true)
    }

    fn read_from(&self, from: Option<&Timestamp>) -> Result<Vec<Operation>> {
        Ok(match from {
            Some(from) => self
                .log
                .range(from.clone()..)
                .map(|(_, op)| op.clone())
                .collect(),
            None => self.log.values().cloned().collect(),
        })
    }

    fn read_since_sync(
        &self,
        cursor: Option<&Timestamp>,
        upper_bound: Option<&Timestamp>,
    ) -> Result<Vec<Operation>> {
        let mut out: Vec<Operation> = self
            .log
            .values()
            .filter(|op| match &op.sync_timestamp {
                None => false,
                Some(sync_ts) => {
                    let above_cursor = cursor.map(|c| sync_ts > c).unwrap_or(true);
                    let below_upper = upper_bound.map(|u| sync_ts <= u).unwrap_or(true);
                    above_cursor && below_upper
                }
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.sync_timestamp.cmp(&b.sync_timestamp));
        Ok(out)
    }

    fn mark_synced(&mut self, timestamp: &Timestamp, sync_timestamp: Timestamp) -> Result<()> {
        if let Some(op) = self.log.get_mut(timestamp) {
            op.sync_timestamp = Some(sync_timestamp);
        }
        Ok(())
    }

    fn get_parent(&self, node: &NodeId) -> Result<Option<NodeId>> {
        Ok(self.nodes.get(node).cloned().flatten())
    }

    fn put_parent(&mut self, node: &NodeId, parent: Option<NodeId>) -> Result<()> {
        self.nodes.insert(node.clone(), parent);
        Ok(())
    }

    fn all_nodes(&self) -> Result<Vec<(NodeId, Option<NodeId>)>> {
        Ok(self
            .nodes
            .iter()
            .map(|(id, parent)| (id.clone(), parent.clone()))
            .collect())
    }

    fn reset_nodes_to_seed(&mut self) -> Result<()> {
        self.nodes.clear();
        self.nodes.insert(NodeId::root(), None);
        self.nodes.insert(NodeId::tombstone(), None);
        Ok(())
    }

    fn latest_timestamp(&self) -> Result<Option<Timestamp>> {
        Ok(self.log.keys().next_back().cloned())
    }

    fn clear(&mut self) -> Result<()> {
        self.log.clear();
        self.reset_nodes_to_seed()
    }
}
