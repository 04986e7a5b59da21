use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tungstenite::protocol::Message as WsMessage;

use super::BroadcastService;
use super::connection::Connection;
use super::generator::{self, MAX_OCCUPANCY, MIN_VISITORS, MIN_WAIT_MINUTES, SnapshotGenerator};
use super::registry::SubscriptionRegistry;
use super::scheduler::TopicScheduler;
use super::snapshot::{AlertCategory, Severity, StatusSnapshot};
use crate::transport::message::{ClientMessage, ServerMessage};

fn channel() -> (UnboundedSender<WsMessage>, UnboundedReceiver<WsMessage>) {
    mpsc::unbounded_channel::<WsMessage>()
}

fn decode(msg: WsMessage) -> ServerMessage {
    let text = msg.to_text().expect("text frame").to_string();
    ServerMessage::parse(&text).expect("server message")
}

fn next_snapshot(rx: &mut UnboundedReceiver<WsMessage>) -> StatusSnapshot {
    match decode(rx.try_recv().expect("a queued frame")) {
        ServerMessage::StatusUpdate(snapshot) => snapshot,
        other => panic!("Expected status_update, got {other:?}"),
    }
}

fn drain(rx: &mut UnboundedReceiver<WsMessage>) -> usize {
    let mut n = 0;
    while rx.try_recv().is_ok() {
        n += 1;
    }
    n
}

fn service(period_ms: u64) -> BroadcastService {
    BroadcastService::new(SnapshotGenerator::new(0.0), Duration::from_millis(period_ms))
}

// ---- generator ----

#[test]
fn test_generate_stays_within_bounds_for_known_topics() {
    let generator = SnapshotGenerator::default();
    let mut rng = StdRng::seed_from_u64(7);

    for topic in ["dwarka", "ambaji", "somnath"] {
        let base = generator.baseline(topic);
        for _ in 0..200 {
            let s = generator.generate(topic, &mut rng);
            assert_eq!(s.temple_id, topic);
            assert!(s.current_visitors >= MIN_VISITORS);
            let low = (f64::from(base.visitors) * 0.95).floor() as u32;
            let high = (f64::from(base.visitors) * 1.05).ceil() as u32;
            assert!(s.current_visitors >= low && s.current_visitors <= high);
            assert!(s.occupancy_percent <= MAX_OCCUPANCY);
            assert!(s.avg_wait_time >= MIN_WAIT_MINUTES);
            assert!(s.queue_length <= (f64::from(s.current_visitors) * 0.05).ceil() as u32);
            assert!(s.alerts.len() <= 1);
        }
    }
}

#[test]
fn test_generate_unknown_topic_uses_default_baseline() {
    let generator = SnapshotGenerator::default();
    let mut rng = StdRng::seed_from_u64(42);

    assert_eq!(
        generator.baseline("unknown-temple"),
        generator.baseline(SnapshotGenerator::DEFAULT_TOPIC)
    );

    let s = generator.generate("unknown-temple", &mut rng);
    assert_eq!(s.temple_id, "unknown-temple");
    assert!(s.current_visitors >= 1000);
}

#[test]
fn test_generate_floors_tiny_baselines() {
    let generator = SnapshotGenerator::new(0.0).with_baseline(
        "hamlet",
        generator::Baseline {
            visitors: 10,
            capacity: 100_000,
        },
    );
    let mut rng = StdRng::seed_from_u64(1);
    let s = generator.generate("hamlet", &mut rng);
    assert_eq!(s.current_visitors, MIN_VISITORS);
    assert_eq!(s.occupancy_percent, 1);
    assert_eq!(s.avg_wait_time, MIN_WAIT_MINUTES);
}

#[test]
fn test_generate_clamps_occupancy_when_over_capacity() {
    let generator = SnapshotGenerator::new(0.0).with_baseline(
        "packed",
        generator::Baseline {
            visitors: 60_000,
            capacity: 50_000,
        },
    );
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..50 {
        assert_eq!(generator.generate("packed", &mut rng).occupancy_percent, MAX_OCCUPANCY);
    }
}

#[test]
fn test_alert_probability_bounds() {
    let mut rng = StdRng::seed_from_u64(11);

    let never = SnapshotGenerator::new(0.0);
    assert!((0..100).all(|_| never.generate("dwarka", &mut rng).alerts.is_empty()));

    let always = SnapshotGenerator::new(1.0);
    for _ in 0..100 {
        let s = always.generate("dwarka", &mut rng);
        assert_eq!(s.alerts.len(), 1);
        let alert = &s.alerts[0];
        assert!(alert.id.starts_with("alert-"));
        assert!(generator::alert_messages(alert.category).contains(&alert.message.as_str()));
    }

    assert_eq!(SnapshotGenerator::new(7.5).alert_probability(), 1.0);
    assert_eq!(SnapshotGenerator::new(-1.0).alert_probability(), 0.0);
}

#[test]
fn test_generate_surge_is_deterministic() {
    let generator = SnapshotGenerator::default();

    for (topic, capacity) in [("dwarka", 50_000u32), ("ambaji", 30_000), ("somnath", 40_000)] {
        let s = generator.generate_surge(topic);
        assert_eq!(s.occupancy_percent, 90);
        assert_eq!(s.avg_wait_time, 75);
        assert_eq!(s.current_visitors, (f64::from(capacity) * 0.9).round() as u32);
        assert_eq!(s.queue_length, (f64::from(capacity) * 0.15).round() as u32);
        assert_eq!(s.alerts.len(), 1);
        assert_eq!(s.alerts[0].severity, Severity::High);
        assert_eq!(s.alerts[0].category, AlertCategory::Crowd);
        assert!(s.alerts[0].id.starts_with("surge-"));
        assert!(s.is_surge());
    }

    let unknown = generator.generate_surge("unknown-temple");
    assert_eq!(unknown.queue_length, 7500);
}

#[test]
fn test_regular_readings_are_never_surges() {
    let generator = SnapshotGenerator::new(1.0);
    let mut rng = StdRng::seed_from_u64(11);

    for _ in 0..200 {
        let s = generator.generate("dwarka", &mut rng);
        assert_eq!(s.alerts.len(), 1);
        assert!(!s.is_surge());
    }
}

// ---- registry ----

#[test]
fn test_register_reports_first_subscriber() {
    let registry = SubscriptionRegistry::new();
    let (tx, _rx) = channel();

    assert!(registry.register(Connection::new("dwarka", tx.clone())));
    assert!(!registry.register(Connection::new("dwarka", tx.clone())));
    assert!(registry.register(Connection::new("ambaji", tx)));

    assert_eq!(registry.subscriber_count("dwarka"), 2);
    assert_eq!(registry.subscriber_count("ambaji"), 1);
    assert_eq!(registry.connection_count(), 3);
}

#[test]
fn test_unregister_reports_last_subscriber() {
    let registry = SubscriptionRegistry::new();
    let (tx, _rx) = channel();
    let a = Connection::new("dwarka", tx.clone());
    let b = Connection::new("dwarka", tx);
    let (a_id, b_id) = (a.id.clone(), b.id.clone());
    registry.register(a);
    registry.register(b);

    assert_eq!(registry.unregister(&a_id), Some(("dwarka".to_string(), false)));
    assert_eq!(registry.unregister(&b_id), Some(("dwarka".to_string(), true)));
    assert_eq!(registry.unregister(&b_id), None);
    assert_eq!(registry.connection_count(), 0);
    assert_eq!(registry.subscriber_count("dwarka"), 0);
}

#[test]
fn test_broadcast_reaches_only_topic_members() {
    let registry = SubscriptionRegistry::new();
    let (tx_a, mut rx_a) = channel();
    let (tx_b, mut rx_b) = channel();
    let (tx_c, mut rx_c) = channel();
    registry.register(Connection::new("dwarka", tx_a));
    registry.register(Connection::new("dwarka", tx_b));
    registry.register(Connection::new("somnath", tx_c));

    let snapshot = SnapshotGenerator::default().generate_surge("dwarka");
    assert_eq!(registry.broadcast("dwarka", &snapshot), 2);

    let a = rx_a.try_recv().unwrap();
    let b = rx_b.try_recv().unwrap();
    assert_eq!(a, b);
    assert!(rx_c.try_recv().is_err());

    match decode(a) {
        ServerMessage::StatusUpdate(received) => assert_eq!(received, snapshot),
        other => panic!("Expected status_update, got {other:?}"),
    }
}

#[test]
fn test_broadcast_skips_closed_connection() {
    let registry = SubscriptionRegistry::new();
    let (tx_dead, rx_dead) = channel();
    let (tx_live, mut rx_live) = channel();
    registry.register(Connection::new("dwarka", tx_dead));
    registry.register(Connection::new("dwarka", tx_live));

    // Drop the receiver to close the channel
    drop(rx_dead);

    let snapshot = SnapshotGenerator::default().generate_surge("dwarka");
    assert_eq!(registry.broadcast("dwarka", &snapshot), 1);
    assert!(rx_live.try_recv().is_ok());
}

#[test]
fn test_broadcast_to_empty_topic_is_noop() {
    let registry = SubscriptionRegistry::new();
    let snapshot = SnapshotGenerator::default().generate_surge("nowhere");
    assert_eq!(registry.broadcast("nowhere", &snapshot), 0);
}

#[test]
fn test_send_to_targets_single_connection() {
    let registry = SubscriptionRegistry::new();
    let (tx_a, mut rx_a) = channel();
    let (tx_b, mut rx_b) = channel();
    let a = Connection::new("dwarka", tx_a);
    let a_id = a.id.clone();
    registry.register(a);
    registry.register(Connection::new("dwarka", tx_b));

    let snapshot = SnapshotGenerator::default().generate_surge("dwarka");
    assert!(registry.send_to(&a_id, &snapshot));
    assert!(rx_a.try_recv().is_ok());
    assert!(rx_b.try_recv().is_err());

    assert!(!registry.send_to("client-missing", &snapshot));
}

#[test]
fn test_concurrent_register_unregister_keeps_membership_consistent() {
    let registry = Arc::new(SubscriptionRegistry::new());
    let mut handles = Vec::new();

    for worker in 0..8 {
        let registry = registry.clone();
        handles.push(std::thread::spawn(move || {
            let topic = if worker % 2 == 0 { "dwarka" } else { "ambaji" };
            let mut kept = Vec::new();
            for i in 0..200 {
                let (tx, _rx) = mpsc::unbounded_channel::<WsMessage>();
                let connection = Connection::new(topic, tx);
                let id = connection.id.clone();
                registry.register(connection);
                if i % 4 == 0 {
                    kept.push(id);
                } else {
                    registry.unregister(&id);
                }
            }
            kept.len()
        }));
    }

    let kept: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(registry.connection_count(), kept);
    assert_eq!(
        registry.subscriber_count("dwarka") + registry.subscriber_count("ambaji"),
        kept
    );
}

// ---- scheduler ----

fn scheduler(period_ms: u64) -> (Arc<SubscriptionRegistry>, TopicScheduler) {
    let registry = Arc::new(SubscriptionRegistry::new());
    let scheduler = TopicScheduler::new(
        registry.clone(),
        Arc::new(SnapshotGenerator::new(0.0)),
        Duration::from_millis(period_ms),
    );
    (registry, scheduler)
}

#[tokio::test]
async fn test_scheduler_start_and_stop_are_idempotent() {
    let (_registry, scheduler) = scheduler(1_000);

    assert!(scheduler.start("dwarka"));
    assert!(!scheduler.start("dwarka"));
    assert_eq!(scheduler.active_count(), 1);

    assert!(scheduler.stop("dwarka"));
    assert!(!scheduler.stop("dwarka"));
    assert_eq!(scheduler.active_count(), 0);
    assert!(!scheduler.is_running("dwarka"));
}

#[tokio::test]
async fn test_scheduler_ticks_fan_out_to_topic() {
    let (registry, scheduler) = scheduler(40);
    let (tx, mut rx) = channel();
    registry.register(Connection::new("ambaji", tx));

    scheduler.start("ambaji");
    tokio::time::sleep(Duration::from_millis(150)).await;

    let snapshot = next_snapshot(&mut rx);
    assert_eq!(snapshot.temple_id, "ambaji");
    assert!(drain(&mut rx) >= 1);
    scheduler.stop("ambaji");
}

#[tokio::test]
async fn test_scheduler_duplicate_start_does_not_double_rate() {
    let (registry, scheduler) = scheduler(100);
    let (tx, mut rx) = channel();
    registry.register(Connection::new("dwarka", tx));

    scheduler.start("dwarka");
    scheduler.start("dwarka");
    tokio::time::sleep(Duration::from_millis(350)).await;
    scheduler.stop("dwarka");

    // a single 100ms timer fires 3 times in 350ms
    let ticks = drain(&mut rx);
    assert!((2..=4).contains(&ticks), "unexpected tick count {ticks}");
}

#[tokio::test]
async fn test_no_ticks_after_stop() {
    let (registry, scheduler) = scheduler(20);
    let (tx, mut rx) = channel();
    registry.register(Connection::new("dwarka", tx));

    scheduler.start("dwarka");
    tokio::time::sleep(Duration::from_millis(70)).await;
    scheduler.stop("dwarka");
    drain(&mut rx);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(drain(&mut rx), 0);
}

#[tokio::test]
async fn test_zero_period_is_raised_to_minimum() {
    let service = BroadcastService::new(SnapshotGenerator::new(0.0), Duration::ZERO);
    let (tx, mut rx) = channel();
    service.accept_connection("dwarka", tx);

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(service.scheduler().is_running("dwarka"));
    // initial snapshot plus periodic ticks
    assert!(drain(&mut rx) > 2);
    service.shutdown();
}

// ---- service ----

fn assert_invariant(service: &BroadcastService, topics: &[&str]) {
    for topic in topics {
        assert_eq!(
            service.scheduler().is_running(topic),
            service.connected_clients(Some(topic)) > 0,
            "timer/subscriber mismatch for {topic}"
        );
    }
}

#[tokio::test]
async fn test_accept_sends_initial_snapshot_and_starts_timer() {
    let service = service(60_000);
    let (tx, mut rx) = channel();

    assert!(!service.scheduler().is_running("dwarka"));
    service.accept_connection("dwarka", tx);
    assert!(service.scheduler().is_running("dwarka"));

    let snapshot = next_snapshot(&mut rx);
    assert_eq!(snapshot.temple_id, "dwarka");
}

#[tokio::test]
async fn test_timer_runs_iff_topic_has_connections() {
    let service = service(60_000);
    let topics = ["dwarka", "ambaji"];
    let (tx, _rx) = channel();

    let a = service.accept_connection("dwarka", tx.clone());
    assert_invariant(&service, &topics);
    let b = service.accept_connection("dwarka", tx.clone());
    assert_invariant(&service, &topics);
    let c = service.accept_connection("ambaji", tx);
    assert_invariant(&service, &topics);

    service.on_disconnect(&a);
    assert_invariant(&service, &topics);
    assert!(service.scheduler().is_running("dwarka"));

    service.on_disconnect(&b);
    assert_invariant(&service, &topics);
    assert!(!service.scheduler().is_running("dwarka"));

    service.on_disconnect(&c);
    service.on_disconnect(&c);
    assert_invariant(&service, &topics);
    assert_eq!(service.scheduler().active_count(), 0);
}

#[tokio::test]
async fn test_no_tick_after_last_disconnect() {
    let service = service(20);
    let (tx, mut rx) = channel();
    let id = service.accept_connection("somnath", tx);

    tokio::time::sleep(Duration::from_millis(70)).await;
    service.on_disconnect(&id);
    drain(&mut rx);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(drain(&mut rx), 0);
    assert!(!service.scheduler().is_running("somnath"));
}

#[tokio::test]
async fn test_request_update_is_unicast() {
    let service = service(60_000);
    let (tx_a, mut rx_a) = channel();
    let (tx_b, mut rx_b) = channel();
    let a = service.accept_connection("dwarka", tx_a);
    service.accept_connection("dwarka", tx_b);
    drain(&mut rx_a);
    drain(&mut rx_b);

    service.on_client_message(&a, r#"{"type":"request_update"}"#);

    assert_eq!(next_snapshot(&mut rx_a).temple_id, "dwarka");
    assert!(rx_b.try_recv().is_err());
}

#[tokio::test]
async fn test_ping_replies_with_pong() {
    let service = service(60_000);
    let (tx, mut rx) = channel();
    let id = service.accept_connection("dwarka", tx);
    drain(&mut rx);

    service.on_client_command(&id, ClientMessage::Ping);

    match decode(rx.try_recv().unwrap()) {
        ServerMessage::Pong { .. } => {}
        other => panic!("Expected pong, got {other:?}"),
    }
}

#[tokio::test]
async fn test_simulate_surge_reaches_every_subscriber() {
    let service = service(60_000);
    let (tx_a, mut rx_a) = channel();
    let (tx_b, mut rx_b) = channel();
    let (tx_other, mut rx_other) = channel();
    let a = service.accept_connection("dwarka", tx_a);
    service.accept_connection("dwarka", tx_b);
    service.accept_connection("ambaji", tx_other);
    drain(&mut rx_a);
    drain(&mut rx_b);
    drain(&mut rx_other);

    service.on_client_message(&a, r#"{"type":"simulate_surge"}"#);

    let frame_a = rx_a.try_recv().unwrap();
    let frame_b = rx_b.try_recv().unwrap();
    assert_eq!(frame_a, frame_b);
    assert!(rx_other.try_recv().is_err());

    match decode(frame_a) {
        ServerMessage::StatusUpdate(s) => assert_eq!(s.occupancy_percent, 90),
        other => panic!("Expected status_update, got {other:?}"),
    }
}

#[tokio::test]
async fn test_trigger_surge_without_connection() {
    let service = service(60_000);
    assert_eq!(service.trigger_surge("dwarka"), 0);

    let (tx, mut rx) = channel();
    service.accept_connection("dwarka", tx);
    drain(&mut rx);

    assert_eq!(service.trigger_surge("dwarka"), 1);
    assert_eq!(next_snapshot(&mut rx).occupancy_percent, 90);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_surges_each_deliver_once() {
    let service = service(60_000);
    let (tx, mut rx) = channel();
    let id = service.accept_connection("dwarka", tx);
    drain(&mut rx);

    let from_client = {
        let service = service.clone();
        let id = id.clone();
        tokio::spawn(async move { service.on_client_command(&id, ClientMessage::SimulateSurge) })
    };
    let from_rest = {
        let service = service.clone();
        tokio::spawn(async move { service.trigger_surge("dwarka") })
    };
    from_client.await.unwrap();
    assert_eq!(from_rest.await.unwrap(), 1);

    // two triggers, two surge frames: overlapping but each delivered once
    assert_eq!(next_snapshot(&mut rx).occupancy_percent, 90);
    assert_eq!(next_snapshot(&mut rx).occupancy_percent, 90);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_malformed_and_unknown_messages_are_ignored() {
    let service = service(60_000);
    let (tx, mut rx) = channel();
    let id = service.accept_connection("dwarka", tx);
    drain(&mut rx);

    service.on_client_message(&id, "not json at all");
    service.on_client_message(&id, r#"{"no_type":true}"#);
    service.on_client_message(&id, r#"{"type":"dance"}"#);

    assert!(rx.try_recv().is_err());
    assert_eq!(service.connected_clients(Some("dwarka")), 1);

    // still operable
    service.on_client_message(&id, r#"{"type":"request_update"}"#);
    assert!(rx.try_recv().is_ok());
}

#[tokio::test]
async fn test_unknown_topic_subscription_degrades_gracefully() {
    let service = service(60_000);
    let (tx, mut rx) = channel();
    service.accept_connection("unknown-temple", tx);

    let snapshot = next_snapshot(&mut rx);
    assert_eq!(snapshot.temple_id, "unknown-temple");
    assert!(snapshot.current_visitors >= 1000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_connect_disconnect_preserves_timer_invariant() {
    let service = service(5);
    let mut tasks = Vec::new();

    for worker in 0..8 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            let topic = if worker % 2 == 0 { "dwarka" } else { "somnath" };
            for _ in 0..50 {
                let (tx, _rx) = mpsc::unbounded_channel::<WsMessage>();
                let id = service.accept_connection(topic, tx);
                tokio::task::yield_now().await;
                service.on_disconnect(&id);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(service.connected_clients(None), 0);
    assert_eq!(service.scheduler().active_count(), 0);
    assert_invariant(&service, &["dwarka", "somnath"]);
}
