#![forbid(unsafe_code)]
//! Core primitives for a Tree CRDT synced through an append-only, timestamp-ordered move log.
//! This crate stays independent of concrete storage engines and transports so it can be
//! embedded behind an in-process store, an embedded SQL database, or a networked Relay.

pub mod engine;
pub mod error;
pub mod ids;
pub mod ops;
pub mod timestamp;
pub mod traits;

pub use engine::{
    apply_batch, apply_deletion_restore_policy, is_live, rebuild_nodes, EngineConfig,
};
pub use error::{Error, Result};
pub use ids::{ClientId, NodeId};
pub use ops::{Operation, OperationKind};
pub use timestamp::{Clock, HybridClock, Timestamp};
pub use traits::{LogStore, MemoryLogStore};
