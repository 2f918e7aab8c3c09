use serde::{Deserialize, Serialize};

use thoughtspace_core::Operation;

/// Relay room lifecycle, broadcast whenever it changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Booting,
    Ready,
    Error,
}

/// A node row as returned by a subtree query: `{id, parent_id}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtreeNode {
    pub id: String,
    pub parent_id: Option<String>,
}

/// Reply to a `subtree` request: the JSON array of reachable nodes.
pub type SubtreeReply = Vec<SubtreeNode>;

/// Reply to a `push` request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAck {
    pub sync_timestamp: String,
}

/// Catch-up stream header, sent as the first NDJSON line of a `sync:stream` response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHeader {
    #[serde(rename = "lowerLimit")]
    pub lower_limit: Option<String>,
    #[serde(rename = "upperLimit")]
    pub upper_limit: String,
    pub nodes: u64,
    pub operations: u64,
}

/// Client-to-relay requests. Discriminated by `type`, matching the wire's JSON shape exactly.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    Push {
        operations: Vec<Operation>,
    },
    #[serde(rename = "sync:stream")]
    SyncStream {
        #[serde(rename = "lastSyncTimestamp")]
        last_sync_timestamp: Option<String>,
    },
    Subtree {
        id: String,
        depth: u32,
    },
    Ping,
}

/// Relay-to-all-peers broadcasts. `Push` is re-broadcast to every peer except the originator
/// of the request, with the original operations plus any corrective ones synthesized by the
/// deletion/restore policy appended.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Broadcast {
    Status { status: RoomStatus },
    Connections { clients: Vec<String> },
    Push { operations: Vec<Operation> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_request_round_trips_through_json() {
        let json = r#"{"type":"push","operations":[]}"#;
        let parsed: ClientRequest = serde_json::from_str(json).unwrap();
        match parsed {
            ClientRequest::Push { operations } => assert!(operations.is_empty()),
            other => panic!("expected Push, got {other:?}"),
        }
    }

    #[test]
    fn sync_stream_request_uses_colon_discriminator() {
        let json = r#"{"type":"sync:stream","lastSyncTimestamp":null}"#;
        let parsed: ClientRequest = serde_json::from_str(json).unwrap();
        assert!(matches!(
            parsed,
            ClientRequest::SyncStream {
                last_sync_timestamp: None
            }
        ));
    }

    #[test]
    fn stream_header_uses_camel_case_limits() {
        let header = StreamHeader {
            lower_limit: None,
            upper_limit: "00000000000001700000000000-0000000000-server".to_string(),
            nodes: 2,
            operations: 5,
        };
        let json = serde_json::to_string(&header).unwrap();
        assert!(json.contains("\"lowerLimit\""));
        assert!(json.contains("\"upperLimit\""));
    }

    #[test]
    fn broadcast_status_round_trips() {
        let json = r#"{"type":"status","status":"ready"}"#;
        let parsed: Broadcast = serde_json::from_str(json).unwrap();
        assert!(matches!(
            parsed,
            Broadcast::Status {
                status: RoomStatus::Ready
            }
        ));
    }
}
