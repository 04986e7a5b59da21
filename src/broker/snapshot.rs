//! Status snapshot definitions
//!
//! `StatusSnapshot` is the value the broker pushes to every subscriber of a
//! topic. It is built once per tick (or per on-demand request) and never
//! mutated afterwards. Field names follow the dashboard's JSON contract
//! (`templeId`, `currentVisitors`, ...), so the type serializes directly into
//! the payload of a `status_update` message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TopicId = String;

/// Id prefix carried by the alert of a simulated surge.
pub const SURGE_ALERT_PREFIX: &str = "surge-";

/// One generated status reading for a topic at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub temple_id: TopicId,
    pub timestamp: DateTime<Utc>,
    pub current_visitors: u32,
    pub queue_length: u32,
    /// 0..=100; the generator never exceeds 98 outside a surge.
    pub occupancy_percent: u8,
    /// Minutes.
    pub avg_wait_time: u32,
    pub alerts: Vec<Alert>,
}

impl StatusSnapshot {
    /// Whether this reading was produced by a surge rather than a tick.
    pub fn is_surge(&self) -> bool {
        self.alerts.iter().any(|a| a.id.starts_with(SURGE_ALERT_PREFIX))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub category: AlertCategory,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCategory {
    Medical,
    Crowd,
    Security,
    Maintenance,
}

impl AlertCategory {
    pub const ALL: [AlertCategory; 4] = [
        AlertCategory::Medical,
        AlertCategory::Crowd,
        AlertCategory::Security,
        AlertCategory::Maintenance,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Low, Severity::Medium, Severity::High];
}
