//! # TempleCast
//!
//! `templecast` pushes live crowd status for pilgrimage sites to dashboards
//! over WebSockets. Each site is a topic; while a topic has subscribers the
//! server generates a status snapshot on a fixed period and fans it out to
//! all of them, and on demand it broadcasts a simulated crowd surge.
//!
//! ## Core Modules
//!
//! - `broker`: snapshot generation, the subscription registry, per-topic
//!   timers and the `BroadcastService` that ties them together.
//! - `client`: a reconnecting subscriber that keeps the latest snapshot and
//!   a bounded alert history.
//! - `config`: layered settings (defaults, optional file, environment).
//! - `transport`: the JSON wire protocol and the WebSocket server.
//! - `utils`: error type and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod transport;
pub mod utils;
