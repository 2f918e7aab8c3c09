#![forbid(unsafe_code)]
//! Per-thoughtspace authoritative Relay (§4.5): a process-wide service that receives pushes,
//! assigns server-observed `sync_timestamp`s, applies the deletion/restore policy, persists to
//! an embedded store, and fans out to connected peers over WebSocket.

pub mod error;
pub mod handlers;
pub mod room;
pub mod settings;

pub use error::{RelayError, Result};
pub use settings::RelayConfig;
pub use room::Room;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

/// Build the Relay's `axum` router over a shared [`Room`]. Split out from `main` so integration
/// tests can drive the HTTP/WebSocket surface directly with `axum::Router::into_make_service`
/// or `tower::ServiceExt::oneshot` without spawning a real listener.
pub fn router(room: Arc<Room>) -> Router {
    Router::new()
        .route("/ws", get(handlers::ws_handler))
        .route("/push", post(handlers::push_handler))
        .route("/stream", get(handlers::stream_handler))
        .route("/subtree", get(handlers::subtree_handler))
        .route("/hydrate", get(handlers::hydrate_handler))
        .with_state(room)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
