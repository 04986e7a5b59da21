//! The `broker` module is the real-time status broadcast core.
//!
//! - `snapshot`: the `StatusSnapshot` / `Alert` values pushed to subscribers
//! - `generator`: synthesizes snapshots from per-temple baselines
//! - `connection`: one live subscriber link
//! - `registry`: topic membership and fan-out
//! - `scheduler`: one periodic update timer per active topic
//! - `engine`: `BroadcastService`, which ties the pieces together

pub mod connection;
pub mod engine;
pub mod generator;
pub mod registry;
pub mod scheduler;
pub mod snapshot;

pub use engine::BroadcastService;
pub use snapshot::{Alert, AlertCategory, Severity, StatusSnapshot, TopicId};

#[cfg(test)]
mod tests;
