//! Wire protocol
//!
//! Every frame in either direction is a JSON object tagged by `type`.
//! Server → client: `status_update` (snapshot fields inlined) and `pong`.
//! Client → server: `ping`, `request_update`, `simulate_surge`. Any other
//! client `type` decodes to `ClientMessage::Unknown` so the connection can
//! log it and carry on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::snapshot::StatusSnapshot;
use crate::utils::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    RequestUpdate,
    SimulateSurge,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    StatusUpdate(StatusSnapshot),
    Pong { timestamp: DateTime<Utc> },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_frame(self) -> Result<WsMessage> {
        Ok(WsMessage::text(serde_json::to_string(&self)?))
    }
}

impl ServerMessage {
    pub fn status_update(snapshot: StatusSnapshot) -> Self {
        ServerMessage::StatusUpdate(snapshot)
    }

    pub fn pong() -> Self {
        ServerMessage::Pong {
            timestamp: Utc::now(),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_frame(&self) -> Result<WsMessage> {
        Ok(WsMessage::text(serde_json::to_string(self)?))
    }
}
