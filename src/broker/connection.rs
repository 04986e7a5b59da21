//! Connection representation
//!
//! `Connection` models one live subscriber link and holds the sending side of
//! a per-connection channel. The transport drains the receiving side into
//! the WebSocket sink, so pushing a message here never waits on the network.

use tokio::sync::mpsc::UnboundedSender;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use super::snapshot::TopicId;

pub type ConnectionId = String;

#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub topic_id: TopicId,
    pub sender: UnboundedSender<WsMessage>,
}

impl Connection {
    /// Create a connection subscribed to `topic_id`. The id is
    /// `client-<uuid>` and is unique for the lifetime of the process.
    pub fn new(topic_id: impl Into<TopicId>, sender: UnboundedSender<WsMessage>) -> Self {
        Self {
            id: format!("client-{}", Uuid::new_v4()),
            topic_id: topic_id.into(),
            sender,
        }
    }

    /// Queue a frame for delivery. Returns `false` when the transport side
    /// has already gone away.
    pub fn push(&self, msg: WsMessage) -> bool {
        self.sender.send(msg).is_ok()
    }
}
