use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use serde::Deserialize;
use thoughtspace_core::{NodeId, Timestamp};
use thoughtspace_wire::{Broadcast, ClientRequest, PushAck, StreamHeader, SubtreeReply};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, instrument, warn};

use crate::room::Room;

pub type SharedRoom = Arc<Room>;

#[derive(Deserialize)]
pub struct WsQuery {
    client: String,
}

/// `GET /ws?client=<id>` — the single live connection per peer, carrying push/pull/subtree
/// requests and the room's broadcast stream.
pub async fn ws_handler(
    Query(query): Query<WsQuery>,
    State(room): State<SharedRoom>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_socket(socket, room, query.client))
}

/// Outgoing frames are funneled through one channel into one writer task, so both the live
/// broadcast forwarder and direct per-request replies (e.g. a `push` ack) can write to the same
/// socket without fighting over `SplitSink` ownership.
type OutgoingTx = mpsc::UnboundedSender<Message>;

#[instrument(skip(socket, room))]
async fn handle_socket(socket: WebSocket, room: SharedRoom, client_id: String) {
    let (sink, mut stream) = socket.split();
    room.join(&client_id);
    info!(%client_id, "client connected");

    let (out_tx, out_rx) = mpsc::unbounded_channel::<Message>();
    let mut writer_task = tokio::spawn(forward_to_socket(sink, out_rx));

    let mut live = room.subscribe();
    let forward_client_id = client_id.clone();
    let broadcast_tx = out_tx.clone();
    let mut broadcast_task = tokio::spawn(async move {
        loop {
            match live.recv().await {
                Ok(Broadcast::Push { operations }) => {
                    let filtered: Vec<_> = operations
                        .into_iter()
                        .filter(|op| op.client_id.as_str() != forward_client_id)
                        .collect();
                    if filtered.is_empty() {
                        continue;
                    }
                    let msg = Broadcast::Push {
                        operations: filtered,
                    };
                    if broadcast_tx.send(to_text(&msg)).is_err() {
                        break;
                    }
                }
                Ok(other) => {
                    if broadcast_tx.send(to_text(&other)).is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "client lagged behind broadcast, dropping frames");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let request: ClientRequest = match serde_json::from_str(&text) {
            Ok(request) => request,
            Err(err) => {
                warn!(%err, "dropping malformed client request");
                continue;
            }
        };
        if let Err(err) = handle_request(&room, request, &out_tx).await {
            warn!(%err, "request handling failed");
        }
    }

    broadcast_task.abort();
    drop(out_tx);
    writer_task.abort();
    room.leave(&client_id);
    info!(%client_id, "client disconnected");
}

async fn forward_to_socket(
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    use futures_util::SinkExt;
    while let Some(message) = rx.recv().await {
        if sink.send(message).await.is_err() {
            break;
        }
    }
}

async fn handle_request(
    room: &SharedRoom,
    request: ClientRequest,
    out_tx: &OutgoingTx,
) -> crate::error::Result<()> {
    match request {
        ClientRequest::Push { operations } => {
            let sync_timestamp = room.push(operations)?;
            debug!(%sync_timestamp, "push applied");
            let ack = PushAck {
                sync_timestamp: sync_timestamp.to_sortable_string(),
            };
            let _ = out_tx.send(to_text(&ack));
        }
        ClientRequest::Ping => {
            let _ = out_tx.send(to_text(&Broadcast::Status {
                status: room.status(),
            }));
            let _ = out_tx.send(to_text(&Broadcast::Connections {
                clients: room.roster(),
            }));
        }
        ClientRequest::SyncStream { .. } | ClientRequest::Subtree { .. } => {
            // Served over the dedicated `/stream` and `/subtree` HTTP paths; a peer that issues
            // these as live-socket frames gets no reply here.
        }
    }
    Ok(())
}

fn to_text(value: &impl serde::Serialize) -> Message {
    Message::Text(serde_json::to_string(value).unwrap_or_default())
}

#[derive(Deserialize)]
pub struct PushBody {
    operations: Vec<thoughtspace_core::Operation>,
}

/// `POST /push` — non-streaming push path for clients that would rather not hold the socket
/// open continuously (e.g. a one-shot batch import).
pub async fn push_handler(
    State(room): State<SharedRoom>,
    axum::Json(body): axum::Json<PushBody>,
) -> impl IntoResponse {
    match room.push(body.operations) {
        Ok(sync_timestamp) => axum::Json(PushAck {
            sync_timestamp: sync_timestamp.to_sortable_string(),
        })
        .into_response(),
        Err(err) => {
            warn!(%err, "push rejected");
            (axum::http::StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct StreamQuery {
    #[serde(rename = "lastSyncTimestamp")]
    last_sync_timestamp: Option<String>,
}

/// `GET /stream` — catch-up: one NDJSON header line, then one JSON operation per line.
pub async fn stream_handler(
    State(room): State<SharedRoom>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    let cursor = query
        .last_sync_timestamp
        .as_deref()
        .and_then(Timestamp::from_sortable_string);
    match room.pull_since(cursor) {
        Ok(chunk) => {
            let header = StreamHeader {
                lower_limit: chunk.lower_limit.as_ref().map(Timestamp::to_sortable_string),
                upper_limit: chunk.upper_limit.to_sortable_string(),
                nodes: 0,
                operations: chunk.operations.len() as u64,
            };
            let mut body = BytesMut::new();
            body.extend_from_slice(serde_json::to_string(&header).unwrap_or_default().as_bytes());
            body.extend_from_slice(b"\n");
            for op in &chunk.operations {
                body.extend_from_slice(serde_json::to_string(op).unwrap_or_default().as_bytes());
                body.extend_from_slice(b"\n");
            }
            (axum::http::StatusCode::OK, Bytes::from(body)).into_response()
        }
        Err(err) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
pub struct SubtreeQuery {
    id: String,
    depth: u32,
}

/// `GET /subtree?id=&depth=` — subtree of `nodes` reachable downward from `id`.
pub async fn subtree_handler(
    State(room): State<SharedRoom>,
    Query(query): Query<SubtreeQuery>,
) -> impl IntoResponse {
    let reply: SubtreeReply = match room.subtree(&NodeId::from(query.id.as_str()), query.depth) {
        Ok(reply) => reply,
        Err(err) => {
            return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    };
    axum::Json(reply).into_response()
}

/// `GET /hydrate` — binary snapshot of `nodes` and `op_log`, written in bounded batches so the
/// writer side yields between chunks and a slow reader applies TCP backpressure rather than
/// buffering the whole thoughtspace in memory.
pub async fn hydrate_handler(State(room): State<SharedRoom>) -> impl IntoResponse {
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(4);
    let batch_size = room.config().hydration_row_batch;

    tokio::spawn(async move {
        let (nodes, operations) = match room.snapshot() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(%err, "hydration snapshot failed");
                return;
            }
        };

        let mut buf = Vec::new();
        {
            let mut writer = thoughtspace_wire::HydrationWriter::new(&mut buf);
            if writer
                .write_preamble(nodes.len() as u32, operations.len() as u32)
                .is_err()
            {
                return;
            }
        }

        // Each row gets its own short-lived writer over `buf` so the mutable borrow ends
        // before `mem::take` drains the accumulated chunk between batches.
        let mut since_flush = 0usize;
        for (id, parent) in &nodes {
            {
                let mut writer = thoughtspace_wire::HydrationWriter::new(&mut buf);
                if writer.write_node(id, parent.as_ref()).is_err() {
                    return;
                }
            }
            since_flush += 1;
            if since_flush >= batch_size {
                if tx.send(Ok(Bytes::from(std::mem::take(&mut buf)))).await.is_err() {
                    return;
                }
                since_flush = 0;
            }
        }
        for op in &operations {
            {
                let mut writer = thoughtspace_wire::HydrationWriter::new(&mut buf);
                if writer.write_operation(op).is_err() {
                    return;
                }
            }
            since_flush += 1;
            if since_flush >= batch_size {
                if tx.send(Ok(Bytes::from(std::mem::take(&mut buf)))).await.is_err() {
                    return;
                }
                since_flush = 0;
            }
        }
        if !buf.is_empty() {
            if tx.send(Ok(Bytes::from(std::mem::take(&mut buf)))).await.is_err() {
                return;
            }
        }
        let mut tail = Vec::new();
        {
            use byteorder::{BigEndian, WriteBytesExt};
            let _ = tail.write_i16::<BigEndian>(-1);
        }
        let _ = tx.send(Ok(Bytes::from(tail))).await;
    });

    Body::from_stream(ReceiverStream::new(rx))
}
