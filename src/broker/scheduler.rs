//! Per-topic update timers
//!
//! `TopicScheduler` keeps at most one repeating timer per topic in a map from
//! topic id to its cancellation handle. `start` and `stop` are idempotent:
//! presence in the map is the only source of truth, and both operate on the
//! map entry atomically.
//!
//! Every timer owns a small gate (`Mutex<bool>`). A tick delivers only while
//! holding the gate with the flag still set, and `stop` clears the flag under
//! the same lock before aborting the task. Once `stop` returns, no tick for
//! that topic can reach a subscriber.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::generator::SnapshotGenerator;
use super::registry::{SubscriptionRegistry, encode};
use super::snapshot::TopicId;

/// Shortest period a timer will run at; shorter requests are raised to it.
pub const MIN_PERIOD: Duration = Duration::from_millis(10);

struct TopicTimer {
    active: Arc<Mutex<bool>>,
    task: JoinHandle<()>,
}

impl TopicTimer {
    fn cancel(self) {
        *self.active.lock() = false;
        self.task.abort();
    }
}

pub struct TopicScheduler {
    registry: Arc<SubscriptionRegistry>,
    generator: Arc<SnapshotGenerator>,
    period: Duration,
    timers: DashMap<TopicId, TopicTimer>,
}

impl TopicScheduler {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        generator: Arc<SnapshotGenerator>,
        period: Duration,
    ) -> Self {
        if period < MIN_PERIOD {
            warn!(requested_ms = period.as_millis() as u64, "Update period too short; using minimum");
        }

        Self {
            registry,
            generator,
            period: period.max(MIN_PERIOD),
            timers: DashMap::new(),
        }
    }

    /// Begin periodic updates for `topic`. Returns `false` if a timer is
    /// already running for it. Must be called from within a Tokio runtime.
    pub fn start(&self, topic: &str) -> bool {
        match self.timers.entry(topic.to_string()) {
            Entry::Occupied(_) => {
                debug!(topic = %topic, "Timer already running; start ignored");
                false
            }
            Entry::Vacant(slot) => {
                let active = Arc::new(Mutex::new(true));
                let task = tokio::spawn(run_timer(
                    topic.to_string(),
                    self.period,
                    self.registry.clone(),
                    self.generator.clone(),
                    active.clone(),
                ));
                slot.insert(TopicTimer { active, task });
                info!(topic = %topic, period_ms = self.period.as_millis() as u64, "Started periodic updates");
                true
            }
        }
    }

    /// Cancel periodic updates for `topic`. Returns `false` if none were running.
    pub fn stop(&self, topic: &str) -> bool {
        match self.timers.remove(topic) {
            Some((_, timer)) => {
                timer.cancel();
                info!(topic = %topic, "Stopped periodic updates");
                true
            }
            None => {
                debug!(topic = %topic, "No timer running; stop ignored");
                false
            }
        }
    }

    pub fn stop_all(&self) {
        let topics: Vec<TopicId> = self.timers.iter().map(|t| t.key().clone()).collect();
        for topic in topics {
            self.stop(&topic);
        }
    }

    pub fn is_running(&self, topic: &str) -> bool {
        self.timers.contains_key(topic)
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for TopicScheduler {
    fn drop(&mut self) {
        for entry in self.timers.iter() {
            *entry.value().active.lock() = false;
            entry.value().task.abort();
        }
    }
}

async fn run_timer(
    topic: TopicId,
    period: Duration,
    registry: Arc<SubscriptionRegistry>,
    generator: Arc<SnapshotGenerator>,
    active: Arc<Mutex<bool>>,
) {
    // first tick one full period after start; the subscriber already got
    // an initial snapshot on connect
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        if !tick(&topic, &registry, &generator, &active) {
            break;
        }
    }
}

/// One scheduled update. Returns `false` once the timer has been cancelled.
fn tick(
    topic: &str,
    registry: &SubscriptionRegistry,
    generator: &SnapshotGenerator,
    active: &Mutex<bool>,
) -> bool {
    let snapshot = generator.generate(topic, &mut rand::thread_rng());
    let Some(frame) = encode(&snapshot) else {
        return true;
    };
    let recipients = registry.members(topic);

    let gate = active.lock();
    if !*gate {
        return false;
    }
    let delivered = SubscriptionRegistry::fan_out(topic, &recipients, frame);
    debug!(topic = %topic, delivered, "Periodic update sent");
    true
}
