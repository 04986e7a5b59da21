//! Reconnecting status client
//!
//! `ClientConnector` keeps one WebSocket subscription to a topic open and
//! mirrors what it receives into a `ClientConnectionState`.
//!
//! Lifecycle:
//! - `connect` opens `<url>?topicId=<topic>`; success clears the stored
//!   error and any pending reconnect.
//! - a close with code 1000 (normal closure) leaves the connector
//!   disconnected; any other close code, or a transport error, records an
//!   error and arms a single reconnect timer (`ReconnectSlot`).
//! - `switch_topic` closes the current link cleanly and opens a new one.
//! - `disconnect` cancels the timer and closes cleanly; nothing reconnects
//!   until `connect` is called again.
//!
//! Every opened link gets a generation number. Events from a link that is
//! no longer the current generation (replaced or torn down) are ignored, so
//! a stale close can never arm a second timer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use tungstenite::protocol::CloseFrame;
use tungstenite::protocol::Message as WsMessage;
use tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

use super::reconnect::ReconnectSlot;
use super::state::{ClientConnectionState, ConnectionPhase};
use crate::broker::snapshot::{Alert, StatusSnapshot, TopicId};
use crate::config::ClientSettings;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::error::{Result, TempleCastError};

/// Host callbacks for inbound data. Both default to doing nothing.
pub trait StatusHandler: Send + Sync {
    fn on_update(&self, _snapshot: &StatusSnapshot) {}
    fn on_alert(&self, _alert: &Alert) {}
}

pub struct NoopHandler;

impl StatusHandler for NoopHandler {}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone)]
pub struct ClientConnector {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: String,
    reconnect_interval: Duration,
    alert_history: usize,
    topic: Mutex<TopicId>,
    phase: Mutex<ConnectionPhase>,
    state: Mutex<ClientConnectionState>,
    outbound: Mutex<Option<UnboundedSender<WsMessage>>>,
    reconnect: ReconnectSlot,
    generation: AtomicU64,
    torn_down: AtomicBool,
    reconnect_attempts: AtomicU64,
    handler: Arc<dyn StatusHandler>,
}

impl ClientConnector {
    pub fn new(settings: &ClientSettings, topic: impl Into<TopicId>) -> Self {
        Self::with_handler(settings, topic, Arc::new(NoopHandler))
    }

    pub fn with_handler(
        settings: &ClientSettings,
        topic: impl Into<TopicId>,
        handler: Arc<dyn StatusHandler>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint: settings.url.clone(),
                reconnect_interval: Duration::from_millis(settings.reconnect_interval_ms),
                alert_history: settings.alert_history,
                topic: Mutex::new(topic.into()),
                phase: Mutex::new(ConnectionPhase::Disconnected),
                state: Mutex::new(ClientConnectionState::default()),
                outbound: Mutex::new(None),
                reconnect: ReconnectSlot::new(),
                generation: AtomicU64::new(0),
                torn_down: AtomicBool::new(false),
                reconnect_attempts: AtomicU64::new(0),
                handler,
            }),
        }
    }

    /// Open the subscription. No-op while a link is already open or opening.
    pub async fn connect(&self) {
        if *self.inner.phase.lock() != ConnectionPhase::Disconnected {
            debug!(topic = %self.topic(), "Already connected; connect ignored");
            return;
        }
        self.inner.torn_down.store(false, Ordering::SeqCst);
        self.inner.reconnect.cancel();
        self.inner.clone().open().await;
    }

    /// Tear down: cancel any pending reconnect and close the link cleanly.
    pub fn disconnect(&self) {
        self.inner.supersede("Client disconnecting", true);
        self.inner.reconnect.cancel();
        info!(topic = %self.topic(), "Disconnected");
    }

    /// Move the subscription to `topic`. A live connector closes its link
    /// cleanly and reopens on the new topic; a torn-down one only records it.
    pub async fn switch_topic(&self, topic: impl Into<TopicId>) {
        let topic = topic.into();
        if *self.inner.topic.lock() == topic {
            return;
        }

        self.inner.supersede("Switching topic", false);
        self.inner.reconnect.cancel();

        info!(from = %self.topic(), to = %topic, "Switching topic");
        *self.inner.topic.lock() = topic;

        if !self.inner.torn_down.load(Ordering::SeqCst) {
            self.inner.clone().open().await;
        }
    }

    /// Send a command to the server. Commands are never queued: while not
    /// connected this logs and returns `NotConnected`.
    pub fn send(&self, command: ClientMessage) -> Result<()> {
        let outbound = self.inner.outbound.lock().clone();
        let phase = self.phase();
        let sender = match (phase, outbound) {
            (ConnectionPhase::Connected, Some(sender)) => sender,
            _ => {
                warn!(?command, "WebSocket is not connected");
                return Err(TempleCastError::NotConnected);
            }
        };
        sender
            .send(command.to_frame()?)
            .map_err(|_| TempleCastError::NotConnected)
    }

    pub fn request_update(&self) -> Result<()> {
        self.send(ClientMessage::RequestUpdate)
    }

    pub fn simulate_surge(&self) -> Result<()> {
        self.send(ClientMessage::SimulateSurge)
    }

    pub fn ping(&self) -> Result<()> {
        self.send(ClientMessage::Ping)
    }

    pub fn state(&self) -> ClientConnectionState {
        self.inner.state.lock().clone()
    }

    pub fn phase(&self) -> ConnectionPhase {
        *self.inner.phase.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.phase() == ConnectionPhase::Connected
    }

    pub fn topic(&self) -> TopicId {
        self.inner.topic.lock().clone()
    }

    /// URL the next connection attempt will dial.
    pub fn endpoint_url(&self) -> Result<Url> {
        self.inner.endpoint_url(&self.topic())
    }

    pub fn reconnect_pending(&self) -> bool {
        self.inner.reconnect.is_armed()
    }

    /// Reconnect timers that have fired so far.
    pub fn reconnect_attempts(&self) -> u64 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Feed a close event for the current link, as the transport would.
    #[cfg(test)]
    pub(crate) fn inject_close(&self, code: Option<CloseCode>, failure: Option<String>) {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        self.inner.on_closed(generation, code, failure);
    }
}

impl Inner {
    fn endpoint_url(&self, topic: &str) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)?;
        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "topicId")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(retained)
            .append_pair("topicId", topic);
        Ok(url)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// One connection attempt. Boxed because a failed attempt arms a timer
    /// that calls back into it.
    fn open(self: Arc<Self>) -> BoxFuture<'static, ()> {
        async move {
            let generation = {
                let _fence = self.outbound.lock();
                if self.torn_down.load(Ordering::SeqCst) {
                    return;
                }
                *self.phase.lock() = ConnectionPhase::Connecting;
                self.generation.fetch_add(1, Ordering::SeqCst) + 1
            };
            let topic = self.topic.lock().clone();

            let url = match self.endpoint_url(&topic) {
                Ok(url) => url,
                Err(e) => {
                    warn!(topic = %topic, "Failed to create WebSocket connection: {e}");
                    self.on_closed(generation, None, Some(format!("Failed to create WebSocket connection: {e}")));
                    return;
                }
            };

            debug!(topic = %topic, %url, "Connecting");

            match connect_async(url.as_str()).await {
                Ok((stream, _response)) => match self.on_open(generation, stream) {
                    None => info!(topic = %topic, "Connected"),
                    Some(mut stale) => {
                        debug!(topic = %topic, "Link superseded during handshake");
                        let _ = stale.close(Some(normal_close("Superseded"))).await;
                    }
                },
                Err(e) => {
                    warn!(topic = %topic, "WebSocket error: {e}");
                    self.on_closed(generation, None, Some("WebSocket connection error".to_string()));
                }
            }
        }
        .boxed()
    }

    /// Publish a freshly opened link. Hands the stream back when the link
    /// was superseded while its handshake ran.
    fn on_open(self: &Arc<Self>, generation: u64, stream: WsStream) -> Option<WsStream> {
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        {
            let mut outbound = self.outbound.lock();
            if !self.is_current(generation) {
                return Some(stream);
            }
            *outbound = Some(tx);
            *self.phase.lock() = ConnectionPhase::Connected;
            let mut state = self.state.lock();
            state.connected = true;
            state.error = None;
        }
        self.reconnect.cancel();

        let (mut sink, mut source) = stream.split();

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = msg.is_close();
                if let Err(e) = sink.send(msg).await {
                    debug!("Send loop stopped: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let inner = self.clone();
        tokio::spawn(async move {
            let mut close_code = None;
            let mut failure = None;

            while let Some(frame) = source.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => inner.handle_text(generation, text.as_str()),
                    Ok(WsMessage::Close(frame)) => {
                        close_code = Some(frame.map(|f| f.code).unwrap_or(CloseCode::Status));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if close_code.is_none() {
                            failure = Some(e.to_string());
                        }
                        break;
                    }
                }
            }

            inner.on_closed(generation, close_code, failure);
        });

        None
    }

    fn handle_text(&self, generation: u64, text: &str) {
        if !self.is_current(generation) {
            return;
        }

        match ServerMessage::parse(text) {
            Ok(ServerMessage::StatusUpdate(snapshot)) => {
                self.state
                    .lock()
                    .apply_update(snapshot.clone(), self.alert_history);

                self.handler.on_update(&snapshot);
                for alert in &snapshot.alerts {
                    self.handler.on_alert(alert);
                }
            }
            Ok(ServerMessage::Pong { timestamp }) => {
                debug!(%timestamp, "Pong received");
            }
            Err(e) => {
                warn!("Error parsing WebSocket message: {e}");
            }
        }
    }

    /// The link for `generation` is gone. Reconnect unless the close was
    /// clean, the link was superseded, or the connector was torn down.
    fn on_closed(self: &Arc<Self>, generation: u64, code: Option<CloseCode>, failure: Option<String>) {
        let clean = failure.is_none() && code == Some(CloseCode::Normal);
        let error = if clean {
            None
        } else {
            Some(failure.unwrap_or_else(|| match code {
                Some(code) => format!("WebSocket closed with code {}", u16::from(code)),
                None => "WebSocket closed without a close frame".to_string(),
            }))
        };

        {
            let mut outbound = self.outbound.lock();
            if !self.is_current(generation) {
                debug!(generation, "Close of superseded connection ignored");
                return;
            }
            *outbound = None;
            self.mark_disconnected(error);
        }

        let topic = self.topic.lock().clone();
        if clean || self.torn_down.load(Ordering::SeqCst) {
            info!(topic = %topic, "WebSocket closed cleanly");
            return;
        }

        self.schedule_reconnect(generation, &topic);
    }

    fn schedule_reconnect(self: &Arc<Self>, generation: u64, topic: &str) {
        let inner = self.clone();
        let armed = self.reconnect.arm(self.reconnect_interval, async move {
            if inner.torn_down.load(Ordering::SeqCst) || !inner.is_current(generation) {
                return;
            }
            inner.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
            let topic = inner.topic.lock().clone();
            info!(topic = %topic, "Attempting to reconnect");
            inner.open().await;
        });

        if armed {
            info!(
                topic = %topic,
                delay_ms = self.reconnect_interval.as_millis() as u64,
                "Reconnect scheduled"
            );
        } else {
            debug!(topic = %topic, "Reconnect already pending");
        }
    }

    fn mark_disconnected(&self, error: Option<String>) {
        *self.phase.lock() = ConnectionPhase::Disconnected;
        let mut state = self.state.lock();
        state.connected = false;
        if error.is_some() {
            state.error = error;
        }
    }

    /// Retire the current link: bump the generation, mark the connector
    /// disconnected and send a normal-closure frame on the link, if any.
    /// Holds `outbound` throughout, the same lock `on_open` publishes under.
    fn supersede(&self, reason: &'static str, tear_down: bool) -> bool {
        let sender = {
            let mut outbound = self.outbound.lock();
            if tear_down {
                self.torn_down.store(true, Ordering::SeqCst);
            }
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.mark_disconnected(None);
            outbound.take()
        };

        match sender {
            Some(sender) => sender.send(WsMessage::Close(Some(normal_close(reason)))).is_ok(),
            None => false,
        }
    }
}

fn normal_close(reason: &'static str) -> CloseFrame {
    CloseFrame {
        code: CloseCode::Normal,
        reason: reason.into(),
    }
}
