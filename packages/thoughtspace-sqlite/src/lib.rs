#![forbid(unsafe_code)]
//! SQLite-backed [`LogStore`](thoughtspace_core::LogStore) for the thoughtspace Tree CRDT,
//! persisting the `nodes` / `op_log` / `payloads` / `clients` tables in a single rusqlite
//! connection. Used by both replicas (one connection per local store) and the Relay (one
//! connection per thoughtspace).

mod storage;

pub use storage::SqliteLogStore;
