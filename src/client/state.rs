//! Client-side view of a topic
//!
//! `ClientConnectionState` is what a host UI reads: whether the link is up,
//! the most recent snapshot, a bounded history of alerts (newest first) and
//! the last error. Only the connector writes it.

use std::collections::VecDeque;

use crate::broker::snapshot::{Alert, StatusSnapshot};

pub const DEFAULT_ALERT_HISTORY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientConnectionState {
    pub connected: bool,
    pub last_update: Option<StatusSnapshot>,
    pub alerts: VecDeque<Alert>,
    pub error: Option<String>,
}

impl ClientConnectionState {
    /// Merge a received snapshot. Its alerts go to the front of the history,
    /// in the order they were sent, and the history is cut to `capacity`.
    pub fn apply_update(&mut self, snapshot: StatusSnapshot, capacity: usize) {
        for alert in snapshot.alerts.iter().rev() {
            self.alerts.push_front(alert.clone());
        }
        self.alerts.truncate(capacity);
        self.last_update = Some(snapshot);
    }
}
