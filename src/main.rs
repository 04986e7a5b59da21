//! CLI for TempleCast
//!
//! Subcommands:
//! - `server`: run the broadcast server
//! - `watch`: subscribe to one site and log every update and alert
//! - `surge`: trigger a simulated crowd surge on a site and print the result

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use templecast::broker::{Alert, BroadcastService, StatusSnapshot};
use templecast::client::{ClientConnector, StatusHandler};
use templecast::config::{Settings, load_config};
use templecast::transport::start_websocket_server;
use templecast::utils::{Result, TempleCastError, logging};

const SURGE_WAIT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "templecast")]
enum Command {
    /// Start the WebSocket broadcast server
    Server,
    /// Follow live updates for one site
    Watch {
        #[arg(long, default_value = "dwarka")]
        topic: String,
        /// Server endpoint (defaults to `client.url` from config)
        #[arg(long)]
        url: Option<String>,
    },
    /// Simulate a crowd surge on one site
    Surge {
        #[arg(long, default_value = "dwarka")]
        topic: String,
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {e}");
            return;
        }
    };
    logging::init(&settings.server.log_level);

    let result = match cmd {
        Command::Server => run_server(settings).await,
        Command::Watch { topic, url } => run_watch(with_url(settings, url), topic).await,
        Command::Surge { topic, url } => run_surge(with_url(settings, url), topic).await,
    };

    if let Err(e) = result {
        error!("{e}");
    }
}

fn with_url(mut settings: Settings, url: Option<String>) -> Settings {
    if let Some(url) = url {
        settings.client.url = url;
    }
    settings
}

async fn run_server(settings: Settings) -> Result<()> {
    let service = BroadcastService::from_settings(&settings.broadcast);

    tokio::select! {
        result = start_websocket_server(settings, service.clone()) => {
            error!("WebSocket server exited unexpectedly.");
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    service.shutdown();
    Ok(())
}

struct LogHandler;

impl StatusHandler for LogHandler {
    fn on_update(&self, snapshot: &StatusSnapshot) {
        info!(
            temple = %snapshot.temple_id,
            visitors = snapshot.current_visitors,
            queue = snapshot.queue_length,
            occupancy = snapshot.occupancy_percent,
            wait_min = snapshot.avg_wait_time,
            "Status update"
        );
    }

    fn on_alert(&self, alert: &Alert) {
        warn!(id = %alert.id, category = ?alert.category, severity = ?alert.severity, "{}", alert.message);
    }
}

async fn run_watch(settings: Settings, topic: String) -> Result<()> {
    let connector = ClientConnector::with_handler(&settings.client, topic, Arc::new(LogHandler));
    connector.connect().await;

    tokio::signal::ctrl_c().await?;
    connector.disconnect();
    Ok(())
}

/// Forwards every snapshot to a channel.
struct ForwardHandler(mpsc::UnboundedSender<StatusSnapshot>);

impl StatusHandler for ForwardHandler {
    fn on_update(&self, snapshot: &StatusSnapshot) {
        let _ = self.0.send(snapshot.clone());
    }
}

async fn run_surge(settings: Settings, topic: String) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let connector = ClientConnector::with_handler(&settings.client, topic, Arc::new(ForwardHandler(tx)));
    connector.connect().await;

    let outcome = tokio::time::timeout(SURGE_WAIT, async {
        // initial snapshot first, then the surge; periodic ticks may interleave
        rx.recv().await.ok_or(TempleCastError::NotConnected)?;
        connector.simulate_surge()?;
        loop {
            let snapshot = rx.recv().await.ok_or(TempleCastError::NotConnected)?;
            if snapshot.is_surge() {
                return Ok::<_, TempleCastError>(snapshot);
            }
        }
    })
    .await;
    connector.disconnect();

    let snapshot = match outcome {
        Ok(result) => result?,
        Err(_) => return Err(TempleCastError::NotConnected),
    };
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
