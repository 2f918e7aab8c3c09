use crate::ids::{ClientId, NodeId};
use crate::timestamp::Timestamp;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Operations are a tagged variant; this crate's engine only understands [`OperationKind::Move`].
/// `Update` carries free-form node content for the external last-write-wins register and is
/// persisted alongside moves so the log stays a single total order, but the CRDT Engine ignores it.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum OperationKind {
    Move {
        old_parent_id: Option<NodeId>,
        new_parent_id: NodeId,
    },
    Update {
        content: String,
    },
}

/// Immutable move-log entry. `timestamp` is the primary key; `sync_timestamp` is the one
/// mutable column, written exactly once by the Relay.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Operation {
    pub timestamp: Timestamp,
    pub node_id: NodeId,
    pub client_id: ClientId,
    pub kind: OperationKind,
    pub sync_timestamp: Option<Timestamp>,
    pub last_sync_timestamp: Option<Timestamp>,
}

impl Operation {
    /// Construct a move operation (a creation, reparent, or deletion depending on
    /// `new_parent_id`).
    pub fn mv(
        timestamp: Timestamp,
        node_id: NodeId,
        client_id: ClientId,
        old_parent_id: Option<NodeId>,
        new_parent_id: NodeId,
        last_sync_timestamp: Option<Timestamp>,
    ) -> Self {
        Self {
            timestamp,
            node_id,
            client_id,
            kind: OperationKind::Move {
                old_parent_id,
                new_parent_id,
            },
            sync_timestamp: None,
            last_sync_timestamp,
        }
    }

    /// Construct a content-update operation, outside the tree CRDT's concern but sharing the log.
    pub fn update(
        timestamp: Timestamp,
        node_id: NodeId,
        client_id: ClientId,
        content: String,
        last_sync_timestamp: Option<Timestamp>,
    ) -> Self {
        Self {
            timestamp,
            node_id,
            client_id,
            kind: OperationKind::Update { content },
            sync_timestamp: None,
            last_sync_timestamp,
        }
    }

    pub fn is_move(&self) -> bool {
        matches!(self.kind, OperationKind::Move { .. })
    }

    /// `new_parent_id` for a move operation; `None` for `Update` rows.
    pub fn new_parent_id(&self) -> Option<&NodeId> {
        match &self.kind {
            OperationKind::Move { new_parent_id, .. } => Some(new_parent_id),
            OperationKind::Update { .. } => None,
        }
    }

    /// `old_parent_id` for a move operation; `None` for `Update` rows or node-creating moves.
    pub fn old_parent_id(&self) -> Option<&NodeId> {
        match &self.kind {
            OperationKind::Move { old_parent_id, .. } => old_parent_id.as_ref(),
            OperationKind::Update { .. } => None,
        }
    }

    /// Mark as observed and persisted by the Relay. Column is null -> non-null exactly once.
    pub fn with_sync_timestamp(mut self, sync_timestamp: Timestamp) -> Self {
        self.sync_timestamp = Some(sync_timestamp);
        self
    }
}
