#![forbid(unsafe_code)]
//! Wire protocol for the thoughtspace Relay: the JSON discriminated-union request/broadcast
//! messages used over the live WebSocket, and the binary row framing used for bulk hydration.

mod hydration;
mod messages;

pub use hydration::{HydrationError, HydrationReader, HydrationRow, HydrationWriter, HYDRATION_MAGIC};
pub use messages::{
    Broadcast, ClientRequest, PushAck, RoomStatus, StreamHeader, SubtreeNode, SubtreeReply,
};
