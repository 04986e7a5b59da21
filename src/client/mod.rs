//! The `client` module is the subscriber-side counterpart of the broker.
//!
//! `ClientConnector` holds a persistent subscription to one topic, reconnects
//! after abnormal loss and exposes the latest status through
//! `ClientConnectionState`.

pub mod connector;
pub mod reconnect;
pub mod state;

pub use connector::{ClientConnector, NoopHandler, StatusHandler};
pub use reconnect::ReconnectSlot;
pub use state::{ClientConnectionState, ConnectionPhase, DEFAULT_ALERT_HISTORY};
