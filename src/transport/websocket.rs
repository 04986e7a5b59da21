//! WebSocket transport
//!
//! Accepts TCP connections, upgrades the ones addressed to the configured
//! path and hands each to the `BroadcastService`. Responsibilities:
//! - pick the topic from the `topicId` query parameter (default topic if
//!   absent) and refuse other paths or connections past the configured cap
//! - give every connection an outbound channel drained by its own writer
//!   task, so broker fan-out never waits on a socket
//! - feed inbound text frames to the service and run disconnect cleanup
//!   exactly once, whichever side notices the loss first

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tracing::{debug, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;
use tungstenite::protocol::Message as WsMessage;

use crate::broker::BroadcastService;
use crate::broker::snapshot::TopicId;
use crate::config::Settings;
use crate::utils::error::Result;

pub const TOPIC_QUERY_PARAM: &str = "topicId";

struct HandshakePolicy {
    ws_path: String,
    default_topic: TopicId,
    max_connections: usize,
}

/// Bind to the configured address and serve until the listener fails.
pub async fn start_websocket_server(settings: Settings, service: BroadcastService) -> Result<()> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr).await?;
    serve(listener, service, &settings).await
}

/// Serve WebSocket subscribers on an already-bound listener.
pub async fn serve(listener: TcpListener, service: BroadcastService, settings: &Settings) -> Result<()> {
    let local = listener.local_addr()?;
    let policy = Arc::new(HandshakePolicy {
        ws_path: settings.server.ws_path.clone(),
        default_topic: settings.broadcast.default_topic.clone(),
        max_connections: settings.broadcast.max_connections,
    });

    info!("WebSocket server listening on ws://{local}{}", policy.ws_path);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept TCP connection: {e}");
                continue;
            }
        };

        let service = service.clone();
        let policy = policy.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer, service, policy).await;
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    service: BroadcastService,
    policy: Arc<HandshakePolicy>,
) {
    let mut requested_topic: Option<TopicId> = None;
    let callback = |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
        if request.uri().path() != policy.ws_path {
            return Err(reject(StatusCode::NOT_FOUND, "unknown path"));
        }
        if service.connected_clients(None) >= policy.max_connections {
            return Err(reject(StatusCode::SERVICE_UNAVAILABLE, "too many connections"));
        }
        requested_topic = topic_from_query(request.uri().query());
        Ok(response)
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, "WebSocket handshake error: {e}");
            return;
        }
    };
    let topic = requested_topic.unwrap_or_else(|| policy.default_topic.clone());

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let connection_id = service.accept_connection(&topic, tx);

    let cleanup_called = Arc::new(AtomicBool::new(false));
    let do_cleanup = {
        let service = service.clone();
        let connection_id = connection_id.clone();
        let cleanup_called = cleanup_called.clone();

        move || {
            if !cleanup_called.swap(true, Ordering::SeqCst) {
                service.on_disconnect(&connection_id);
            }
        }
    };

    {
        let connection_id = connection_id.clone();
        let do_cleanup = do_cleanup.clone();

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    warn!(connection = %connection_id, "Failed to send message: {e}");
                    break;
                }
            }

            do_cleanup();
            debug!(connection = %connection_id, "Send loop closed");
        });
    }

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => service.on_client_message(&connection_id, text.as_str()),
            Ok(WsMessage::Close(frame)) => {
                // keep polling so the close reply gets flushed
                debug!(connection = %connection_id, ?frame, "Close frame received");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(connection = %connection_id, "WebSocket error: {e}");
                break;
            }
        }
    }

    do_cleanup();
}

/// `topicId` from a raw query string; empty values count as absent.
pub fn topic_from_query(query: Option<&str>) -> Option<TopicId> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == TOPIC_QUERY_PARAM)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}
