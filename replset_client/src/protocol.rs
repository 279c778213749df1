//! Values exchanged with the transport, codec and dispatcher collaborators.
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    connection::{Authenticated, ChannelId},
    hello_response::HelloResponse,
};

/// Where channels report what happened to them. Every connection is bound to
/// one of these when it is created.
pub type EventSender = mpsc::Sender<ChannelEvent>;

/// A request handed to a channel for writing. Encoding is the codec's job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Request {
    /// Liveness and latency check. The reply carries the same `id`.
    Heartbeat { id: i64 },
    Command {
        database: String,
        document: serde_json::Value,
    },
    /// Acknowledgement check written right after a write command.
    #[serde(rename_all = "camelCase")]
    WriteConcernCheck {
        database: String,
        write_concern: WriteConcern,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteConcern {
    pub w: u32,
    pub journal: bool,
    pub timeout_ms: Option<u64>,
}

impl Default for WriteConcern {
    fn default() -> Self {
        Self {
            w: 1,
            journal: false,
            timeout_ms: None,
        }
    }
}

/// A decoded inbound frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Reply {
    Heartbeat {
        id: i64,
        #[serde(default)]
        hello: Option<HelloResponse>,
    },
    /// Anything else. Routed to waiting callers by the dispatcher, not here.
    Response { payload: serde_json::Value },
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent {
    Connected(ChannelId),
    Disconnected(ChannelId),
    Closed(ChannelId),
    Authenticated {
        channel: ChannelId,
        credential: Authenticated,
    },
    Reply {
        channel: ChannelId,
        reply: Reply,
    },
}

impl ChannelEvent {
    /// The channel this event is about.
    pub fn channel(&self) -> ChannelId {
        match self {
            ChannelEvent::Connected(id)
            | ChannelEvent::Disconnected(id)
            | ChannelEvent::Closed(id) => *id,
            ChannelEvent::Authenticated { channel, .. } | ChannelEvent::Reply { channel, .. } => {
                *channel
            }
        }
    }
}
