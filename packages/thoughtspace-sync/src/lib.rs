#![forbid(unsafe_code)]
//! Sync Coordinator (§4.4): the per-client state machine that drives a local
//! [`thoughtspace_core::LogStore`] through hydration, catch-up, and live sync against a
//! thoughtspace Relay, over a pluggable [`Transport`].

mod coordinator;
mod error;
mod state;
mod transport;

pub use coordinator::{SyncConfig, SyncCoordinator};
pub use error::{Result, SyncError};
pub use state::ClientState;
pub use transport::{HydrationSnapshot, LiveBatch, PullBatch, Transport};
