//! Snapshot generation
//!
//! `SnapshotGenerator` synthesizes status readings for a topic from a fixed
//! per-temple baseline and a caller-supplied random source. It holds no
//! mutable state, so one instance is shared by every timer and request path.
//!
//! Unknown topics never fail: they borrow the default temple's baseline.

use std::collections::HashMap;

use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;

use super::snapshot::{Alert, AlertCategory, SURGE_ALERT_PREFIX, Severity, StatusSnapshot, TopicId};

/// Visitor count floor applied after jitter.
pub const MIN_VISITORS: u32 = 1000;
/// Occupancy ceiling for regular ticks; only a surge reports more.
pub const MAX_OCCUPANCY: u8 = 98;
/// Average wait floor, in minutes.
pub const MIN_WAIT_MINUTES: u32 = 5;

const JITTER: f64 = 0.05;
const QUEUE_FRACTION: std::ops::Range<f64> = 0.02..0.05;
const WAIT_FACTOR: std::ops::Range<f64> = 0.03..0.05;

const SURGE_OCCUPANCY: u8 = 90;
const SURGE_WAIT_MINUTES: u32 = 75;
const SURGE_MESSAGE: &str = "CROWD SURGE DETECTED - Emergency protocols activated";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Baseline {
    pub visitors: u32,
    pub capacity: u32,
}

#[derive(Debug, Clone)]
pub struct SnapshotGenerator {
    baselines: HashMap<TopicId, Baseline>,
    fallback: Baseline,
    alert_probability: f64,
}

impl Default for SnapshotGenerator {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl SnapshotGenerator {
    pub const DEFAULT_TOPIC: &'static str = "dwarka";

    /// Generator over the built-in temple table. `alert_probability` is
    /// clamped into `0.0..=1.0`.
    pub fn new(alert_probability: f64) -> Self {
        let dwarka = Baseline {
            visitors: 36_500,
            capacity: 50_000,
        };
        let baselines = HashMap::from([
            (Self::DEFAULT_TOPIC.to_string(), dwarka),
            (
                "ambaji".to_string(),
                Baseline {
                    visitors: 18_500,
                    capacity: 30_000,
                },
            ),
            (
                "somnath".to_string(),
                Baseline {
                    visitors: 28_000,
                    capacity: 40_000,
                },
            ),
        ]);

        Self {
            baselines,
            fallback: dwarka,
            alert_probability: sanitize_probability(alert_probability),
        }
    }

    /// Add or replace the baseline for a topic.
    pub fn with_baseline(mut self, topic: impl Into<TopicId>, baseline: Baseline) -> Self {
        self.baselines.insert(topic.into(), baseline);
        self
    }

    #[cfg(test)]
    pub(crate) fn alert_probability(&self) -> f64 {
        self.alert_probability
    }

    /// Baseline for `topic`, or the default temple's when the topic is unknown.
    pub fn baseline(&self, topic: &str) -> Baseline {
        self.baselines.get(topic).copied().unwrap_or(self.fallback)
    }

    /// Produce a jittered reading for `topic`, occasionally carrying one alert.
    pub fn generate<R: Rng>(&self, topic: &str, rng: &mut R) -> StatusSnapshot {
        let base = self.baseline(topic);
        let capacity = f64::from(base.capacity.max(1));

        let fluctuation = rng.gen_range(-JITTER..=JITTER);
        let visitors = (f64::from(base.visitors) * (1.0 + fluctuation))
            .round()
            .max(f64::from(MIN_VISITORS)) as u32;

        let occupancy = (f64::from(visitors) / capacity * 100.0)
            .round()
            .clamp(0.0, f64::from(MAX_OCCUPANCY)) as u8;

        let queue_length = (f64::from(visitors) * rng.gen_range(QUEUE_FRACTION)).round() as u32;

        let avg_wait = ((f64::from(queue_length) * rng.gen_range(WAIT_FACTOR)).round() as u32)
            .max(MIN_WAIT_MINUTES);

        let mut alerts = Vec::new();
        if rng.gen_bool(self.alert_probability) {
            alerts.push(random_alert(rng));
        }

        StatusSnapshot {
            temple_id: topic.to_string(),
            timestamp: Utc::now(),
            current_visitors: visitors,
            queue_length,
            occupancy_percent: occupancy,
            avg_wait_time: avg_wait,
            alerts,
        }
    }

    /// Deterministic high-load reading used for operator-triggered surges.
    pub fn generate_surge(&self, topic: &str) -> StatusSnapshot {
        let capacity = f64::from(self.baseline(topic).capacity);
        let now = Utc::now();

        StatusSnapshot {
            temple_id: topic.to_string(),
            timestamp: now,
            current_visitors: (capacity * 0.9).round() as u32,
            queue_length: (capacity * 0.15).round() as u32,
            occupancy_percent: SURGE_OCCUPANCY,
            avg_wait_time: SURGE_WAIT_MINUTES,
            alerts: vec![Alert {
                id: format!("{SURGE_ALERT_PREFIX}{}", now.timestamp_millis()),
                category: AlertCategory::Crowd,
                message: SURGE_MESSAGE.to_string(),
                severity: Severity::High,
                timestamp: now,
            }],
        }
    }
}

fn sanitize_probability(p: f64) -> f64 {
    if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) }
}

fn messages_for(category: AlertCategory) -> &'static [&'static str] {
    match category {
        AlertCategory::Medical => &[
            "Medical emergency at East Gate",
            "First aid required at North Entrance",
            "Dehydration case reported",
        ],
        AlertCategory::Crowd => &[
            "Crowd surge near Entry 3",
            "Queue spillover detected",
            "High density area identified",
        ],
        AlertCategory::Security => &[
            "Security check required",
            "Suspicious activity reported",
            "Bag check station busy",
        ],
        AlertCategory::Maintenance => &[
            "Barricade repair needed",
            "Lighting issue reported",
            "Sound system check required",
        ],
    }
}

fn random_alert<R: Rng>(rng: &mut R) -> Alert {
    let category = AlertCategory::ALL[rng.gen_range(0..AlertCategory::ALL.len())];
    let messages = messages_for(category);
    let message = messages[rng.gen_range(0..messages.len())];
    let severity = Severity::ALL[rng.gen_range(0..Severity::ALL.len())];

    let suffix: String = (0..9)
        .map(|_| char::from(rng.sample(Alphanumeric)).to_ascii_lowercase())
        .collect();
    let now = Utc::now();

    Alert {
        id: format!("alert-{}-{}", now.timestamp_millis(), suffix),
        category,
        message: message.to_string(),
        severity,
        timestamp: now,
    }
}

#[cfg(test)]
pub(crate) fn alert_messages(category: AlertCategory) -> &'static [&'static str] {
    messages_for(category)
}
