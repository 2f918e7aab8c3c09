use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use thoughtspace_core::{
    apply_batch, apply_deletion_restore_policy, ClientId, Clock, EngineConfig, HybridClock,
    LogStore, NodeId, Operation, Timestamp,
};
use thoughtspace_sqlite::SqliteLogStore;
use thoughtspace_wire::{Broadcast, RoomStatus, SubtreeNode};
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};

use crate::error::Result;
use crate::settings::{RelayConfig, UpperLimitPolicy};

const BROADCAST_CAPACITY: usize = 1024;

/// One chunk of the catch-up stream, snapshotted at request start.
pub struct StreamChunk {
    pub lower_limit: Option<Timestamp>,
    pub upper_limit: Timestamp,
    pub operations: Vec<Operation>,
}

/// A per-thoughtspace authoritative Relay room: the canonical `op_log`/`nodes` tables behind a
/// single-writer lock, plus the live broadcast fanout and connection roster.
///
/// Reads (pulls, hydration, subtree) take the same lock as writes because `rusqlite::Connection`
/// is not internally synchronized; §4.5's "reads run concurrent with writes" is honored at the
/// level of not holding the lock across network I/O, not by lock-free access to the connection.
pub struct Room {
    store: Mutex<SqliteLogStore>,
    clock: Mutex<HybridClock>,
    status: Mutex<RoomStatus>,
    clients: Mutex<HashSet<String>>,
    broadcast: broadcast::Sender<Broadcast>,
    config: RelayConfig,
}

impl Room {
    pub fn new(store: SqliteLogStore, config: RelayConfig) -> Self {
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            store: Mutex::new(store),
            clock: Mutex::new(HybridClock::new(ClientId::server())),
            status: Mutex::new(RoomStatus::Ready),
            clients: Mutex::new(HashSet::new()),
            broadcast,
            config,
        }
    }

    fn engine_config(&self) -> EngineConfig {
        self.config.engine_config()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn status(&self) -> RoomStatus {
        self.status.lock().unwrap().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Broadcast> {
        self.broadcast.subscribe()
    }

    /// Register a connected client, broadcasting the updated roster.
    pub fn join(&self, client_id: &str) {
        let roster = {
            let mut clients = self.clients.lock().unwrap();
            clients.insert(client_id.to_string());
            clients.iter().cloned().collect::<Vec<_>>()
        };
        let _ = self.broadcast.send(Broadcast::Connections { clients: roster });
    }

    /// Drop a disconnected client, broadcasting the updated roster.
    pub fn leave(&self, client_id: &str) {
        let roster = {
            let mut clients = self.clients.lock().unwrap();
            clients.remove(client_id);
            clients.iter().cloned().collect::<Vec<_>>()
        };
        let _ = self.broadcast.send(Broadcast::Connections { clients: roster });
    }

    pub fn roster(&self) -> Vec<String> {
        self.clients.lock().unwrap().iter().cloned().collect()
    }

    /// Accept a push: stamp `sync_timestamp`, apply through the CRDT Engine, evaluate the
    /// deletion/restore policy on any move into `TOMBSTONE`, persist, and broadcast the union.
    #[instrument(skip(self, operations))]
    pub fn push(&self, operations: Vec<Operation>) -> Result<Timestamp> {
        let mut store = self.store.lock().unwrap();
        let mut clock = self.clock.lock().unwrap();
        let engine_config = self.engine_config();

        let sync_timestamp = clock.tick();
        let stamped: Vec<Operation> = operations
            .into_iter()
            .map(|op| op.with_sync_timestamp(sync_timestamp.clone()))
            .collect();

        apply_batch(&mut *store, stamped.clone(), &engine_config)?;

        let mut corrective = Vec::new();
        for op in &stamped {
            let synthesized =
                apply_deletion_restore_policy(&mut *store, op, &mut *clock, &engine_config)?;
            if !synthesized.is_empty() {
                debug!(count = synthesized.len(), "synthesized restore operations");
                apply_batch(&mut *store, synthesized.clone(), &engine_config)?;
                corrective.extend(synthesized);
            }
        }

        let mut broadcast_ops = stamped;
        broadcast_ops.extend(corrective);
        let _ = self.broadcast.send(Broadcast::Push {
            operations: broadcast_ops,
        });

        Ok(sync_timestamp)
    }

    /// One chunk of the catch-up stream: everything with `cursor < sync_timestamp <= upperLimit`.
    #[instrument(skip(self))]
    pub fn pull_since(&self, cursor: Option<Timestamp>) -> Result<StreamChunk> {
        let store = self.store.lock().unwrap();
        let clock = self.clock.lock().unwrap();
        let upper_limit = match self.config.relay_upper_limit_policy {
            UpperLimitPolicy::Now | UpperLimitPolicy::FrozenAtStart => clock
                .now()
                .unwrap_or_else(|| Timestamp::new(0, 0, ClientId::server())),
        };
        let operations = store.read_since_sync(cursor.as_ref(), Some(&upper_limit))?;
        Ok(StreamChunk {
            lower_limit: cursor,
            upper_limit,
            operations,
        })
    }

    /// Every `nodes` row and every `op_log` row, for a full binary hydration dump.
    #[instrument(skip(self))]
    pub fn snapshot(&self) -> Result<(Vec<(NodeId, Option<NodeId>)>, Vec<Operation>)> {
        let store = self.store.lock().unwrap();
        let nodes = store.all_nodes()?;
        let operations = store.read_from(None)?;
        Ok((nodes, operations))
    }

    /// Subtree reachable downward from `root`, up to `depth` levels (0 = just `root` itself).
    #[instrument(skip(self))]
    pub fn subtree(&self, root: &NodeId, depth: u32) -> Result<Vec<SubtreeNode>> {
        let store = self.store.lock().unwrap();
        let all = store.all_nodes()?;
        let mut children_of: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for (id, parent) in &all {
            if let Some(parent) = parent {
                children_of.entry(parent.clone()).or_default().push(id.clone());
            }
        }
        let parent_of: HashMap<NodeId, Option<NodeId>> = all.into_iter().collect();

        let mut out = Vec::new();
        let mut frontier = vec![(root.clone(), 0u32)];
        while let Some((node, level)) = frontier.pop() {
            out.push(SubtreeNode {
                id: node.as_str().to_string(),
                parent_id: parent_of
                    .get(&node)
                    .cloned()
                    .flatten()
                    .map(|p| p.as_str().to_string()),
            });
            if level >= depth {
                continue;
            }
            if let Some(children) = children_of.get(&node) {
                for child in children {
                    frontier.push((child.clone(), level + 1));
                }
            }
        }
        Ok(out)
    }

    /// Rebuild `nodes` from the log in place, used after a detected integrity violation.
    pub fn rebuild(&self) -> Result<()> {
        let mut store = self.store.lock().unwrap();
        warn!("rebuilding nodes table from op_log");
        thoughtspace_core::rebuild_nodes(&mut *store, &self.engine_config())?;
        Ok(())
    }
}
