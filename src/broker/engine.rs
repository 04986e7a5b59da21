//! Broadcast engine
//!
//! `BroadcastService` is the entry point the transport and other
//! collaborators talk to. It owns:
//! - the `SubscriptionRegistry` (who listens to which temple)
//! - the `TopicScheduler` (one update timer per temple with listeners)
//! - the `SnapshotGenerator` (what gets sent)
//!
//! Timer start/stop happens inside the registry's per-topic critical section,
//! so a topic has a running timer exactly while it has at least one
//! connection. Everything else the service does is a channel send.
//!
//! The service is cheap to clone; clones share state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use super::connection::{Connection, ConnectionId};
use super::generator::SnapshotGenerator;
use super::registry::SubscriptionRegistry;
use super::scheduler::TopicScheduler;
use crate::config::BroadcastSettings;
use crate::transport::message::{ClientMessage, ServerMessage};

#[derive(Clone)]
pub struct BroadcastService {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<SubscriptionRegistry>,
    generator: Arc<SnapshotGenerator>,
    scheduler: TopicScheduler,
}

impl BroadcastService {
    pub fn new(generator: SnapshotGenerator, update_interval: Duration) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let generator = Arc::new(generator);
        let scheduler = TopicScheduler::new(registry.clone(), generator.clone(), update_interval);

        Self {
            inner: Arc::new(Inner {
                registry,
                generator,
                scheduler,
            }),
        }
    }

    pub fn from_settings(settings: &BroadcastSettings) -> Self {
        Self::new(
            SnapshotGenerator::new(settings.alert_probability),
            Duration::from_millis(settings.update_interval_ms),
        )
    }

    pub fn scheduler(&self) -> &TopicScheduler {
        &self.inner.scheduler
    }

    /// Register a new subscriber on `topic_id` and push it an initial
    /// snapshot. Starts the topic's timer when this is its first subscriber.
    pub fn accept_connection(&self, topic_id: &str, sender: UnboundedSender<WsMessage>) -> ConnectionId {
        let connection = Connection::new(topic_id, sender);
        let connection_id = connection.id.clone();

        let first = self.inner.registry.register_with(connection, |topic| {
            self.inner.scheduler.start(topic);
        });
        info!(connection = %connection_id, topic = %topic_id, first, "Client connected");

        self.send_update(&connection_id, topic_id);
        connection_id
    }

    /// Route one raw text frame from a client. Malformed and unknown
    /// messages are logged and dropped; the connection stays open.
    pub fn on_client_message(&self, connection_id: &str, text: &str) {
        match ClientMessage::parse(text) {
            Ok(ClientMessage::Unknown) => {
                warn!(
                    connection = %connection_id,
                    "Unknown message type: {}",
                    preview(text)
                );
            }
            Ok(command) => self.on_client_command(connection_id, command),
            Err(err) => {
                warn!(
                    connection = %connection_id,
                    "Invalid client message: {err} | {}",
                    preview(text)
                );
            }
        }
    }

    pub fn on_client_command(&self, connection_id: &str, command: ClientMessage) {
        let Some(topic) = self.inner.registry.topic_of(connection_id) else {
            debug!(connection = %connection_id, ?command, "Command from unregistered connection ignored");
            return;
        };

        match command {
            ClientMessage::Ping => match ServerMessage::pong().to_frame() {
                Ok(frame) => {
                    self.inner.registry.send_frame(connection_id, frame);
                }
                Err(e) => warn!("Failed to serialize pong: {e}"),
            },
            ClientMessage::RequestUpdate => {
                self.send_update(connection_id, &topic);
            }
            ClientMessage::SimulateSurge => {
                self.trigger_surge(&topic);
            }
            ClientMessage::Unknown => {
                warn!(connection = %connection_id, "Unknown command ignored");
            }
        }
    }

    /// Drop a connection. Stops the topic's timer when it was the last
    /// subscriber. Safe to call more than once.
    pub fn on_disconnect(&self, connection_id: &str) {
        let removed = self.inner.registry.unregister_with(connection_id, |topic| {
            self.inner.scheduler.stop(topic);
        });

        match removed {
            Some((topic, emptied)) => {
                info!(connection = %connection_id, topic = %topic, last = emptied, "Client disconnected");
            }
            None => debug!(connection = %connection_id, "Disconnect for unknown connection"),
        }
    }

    /// Broadcast the surge snapshot to every subscriber of `topic_id`.
    /// Usable without holding a connection. Returns the recipient count.
    pub fn trigger_surge(&self, topic_id: &str) -> usize {
        warn!(topic = %topic_id, "Simulating crowd surge");
        let snapshot = self.inner.generator.generate_surge(topic_id);
        self.inner.registry.broadcast(topic_id, &snapshot)
    }

    /// Number of live connections, overall or for one topic.
    pub fn connected_clients(&self, topic_id: Option<&str>) -> usize {
        match topic_id {
            Some(topic) => self.inner.registry.subscriber_count(topic),
            None => self.inner.registry.connection_count(),
        }
    }

    /// Stop every topic timer. Connections are left to their transports.
    pub fn shutdown(&self) {
        self.inner.scheduler.stop_all();
    }

    fn send_update(&self, connection_id: &str, topic_id: &str) {
        let snapshot = self.inner.generator.generate(topic_id, &mut rand::thread_rng());
        self.inner.registry.send_to(connection_id, &snapshot);
    }
}

fn preview(text: &str) -> String {
    text.chars().take(100).collect()
}
