//! Subscription registry
//!
//! Tracks live connections and the topic each one belongs to. Topics exist
//! only while they have members: the entry is created by the first
//! `register` and removed by the `unregister` that empties it.
//!
//! Concurrency notes:
//! - `topics` is a `DashMap`, so the entry guard for a topic key is the
//!   per-topic lock. Different topics hash to different shards and proceed
//!   in parallel.
//! - `register_with` / `unregister_with` run their hook while the entry
//!   guard is held. The broadcast engine uses this to start and stop topic
//!   timers atomically with the membership change. Hooks must not touch
//!   the registry.
//! - `broadcast` holds the guard only long enough to clone the member list.
//!   Sends happen after it is released, so a disconnect can proceed while a
//!   fan-out to the same topic is in flight.

use std::collections::HashMap;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};
use tungstenite::protocol::Message as WsMessage;

use super::connection::{Connection, ConnectionId};
use super::snapshot::{StatusSnapshot, TopicId};
use crate::transport::message::ServerMessage;

/// Members of one topic, keyed by connection id.
#[derive(Debug, Default)]
pub struct Topic {
    pub members: HashMap<ConnectionId, Connection>,
}

impl Topic {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    topics: DashMap<TopicId, Topic>,
    connections: DashMap<ConnectionId, TopicId>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `connection` under its topic. Returns `true` when it is the
    /// topic's first member.
    pub fn register(&self, connection: Connection) -> bool {
        self.register_with(connection, |_| {})
    }

    /// Like `register`, calling `on_first` under the topic lock when the
    /// connection is the topic's first member.
    pub fn register_with<F>(&self, connection: Connection, on_first: F) -> bool
    where
        F: FnOnce(&str),
    {
        let topic_id = connection.topic_id.clone();
        let connection_id = connection.id.clone();

        let mut topic = self.topics.entry(topic_id.clone()).or_default();

        topic.members.insert(connection_id.clone(), connection);
        self.connections.insert(connection_id, topic_id.clone());

        let first = topic.len() == 1;
        if first {
            on_first(&topic_id);
        }
        first
    }

    /// Remove a connection. Returns its topic and whether the topic is now
    /// empty, or `None` if the connection was not registered.
    pub fn unregister(&self, connection_id: &str) -> Option<(TopicId, bool)> {
        self.unregister_with(connection_id, |_| {})
    }

    /// Like `unregister`, calling `on_last` under the topic lock when the
    /// removed connection was the topic's last member.
    pub fn unregister_with<F>(&self, connection_id: &str, on_last: F) -> Option<(TopicId, bool)>
    where
        F: FnOnce(&str),
    {
        let (_, topic_id) = self.connections.remove(connection_id)?;

        let emptied = match self.topics.entry(topic_id.clone()) {
            Entry::Occupied(mut topic) => {
                topic.get_mut().members.remove(connection_id);
                if topic.get().is_empty() {
                    // hook first: `remove` releases the shard guard
                    on_last(&topic_id);
                    topic.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => false,
        };

        Some((topic_id, emptied))
    }

    /// Deliver `snapshot` to every member of `topic_id` registered right now.
    /// Returns the number of members the frame was queued for.
    pub fn broadcast(&self, topic_id: &str, snapshot: &StatusSnapshot) -> usize {
        let Some(frame) = encode(snapshot) else {
            return 0;
        };
        self.broadcast_frame(topic_id, frame)
    }

    /// Fan an already-encoded frame out to every current member of `topic_id`.
    fn broadcast_frame(&self, topic_id: &str, frame: WsMessage) -> usize {
        let recipients = self.members(topic_id);
        if recipients.is_empty() {
            debug!(topic = %topic_id, "No subscribers; broadcast skipped");
            return 0;
        }
        Self::fan_out(topic_id, &recipients, frame)
    }

    /// Queue `frame` for each of `recipients`, independently. A closed
    /// recipient is logged and skipped; the rest still get the frame.
    pub fn fan_out(topic_id: &str, recipients: &[Connection], frame: WsMessage) -> usize {
        let mut delivered = 0;
        for connection in recipients {
            if connection.push(frame.clone()) {
                delivered += 1;
            } else {
                warn!(
                    topic = %topic_id,
                    connection = %connection.id,
                    "Skipping closed connection during broadcast"
                );
            }
        }
        delivered
    }

    /// Unicast `snapshot` to one connection. No-op if it is gone.
    pub fn send_to(&self, connection_id: &str, snapshot: &StatusSnapshot) -> bool {
        match encode(snapshot) {
            Some(frame) => self.send_frame(connection_id, frame),
            None => false,
        }
    }

    /// Queue a raw frame for one connection. No-op if it is gone.
    pub fn send_frame(&self, connection_id: &str, frame: WsMessage) -> bool {
        let Some(connection) = self.connection(connection_id) else {
            debug!(connection = %connection_id, "Unicast to unknown connection ignored");
            return false;
        };
        if connection.push(frame) {
            true
        } else {
            warn!(connection = %connection_id, "Unicast to closed connection skipped");
            false
        }
    }

    /// Snapshot of the current members of `topic_id`.
    pub fn members(&self, topic_id: &str) -> Vec<Connection> {
        self.topics
            .get(topic_id)
            .map(|topic| topic.members.values().cloned().collect())
            .unwrap_or_default()
    }

    fn connection(&self, connection_id: &str) -> Option<Connection> {
        let topic_id = self.connections.get(connection_id)?.value().clone();
        self.topics
            .get(&topic_id)
            .and_then(|topic| topic.members.get(connection_id).cloned())
    }

    pub fn topic_of(&self, connection_id: &str) -> Option<TopicId> {
        self.connections
            .get(connection_id)
            .map(|entry| entry.value().clone())
    }

    /// Reference count of `topic_id`; zero when the topic does not exist.
    pub fn subscriber_count(&self, topic_id: &str) -> usize {
        self.topics.get(topic_id).map(|t| t.len()).unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

/// Serialize a snapshot into a `status_update` text frame.
pub(crate) fn encode(snapshot: &StatusSnapshot) -> Option<WsMessage> {
    match ServerMessage::status_update(snapshot.clone()).to_frame() {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(topic = %snapshot.temple_id, "Failed to serialize snapshot: {e}");
            None
        }
    }
}
