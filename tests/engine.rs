//! Engine integration tests.
//!
//! Drive the full engine — dispatch workers, ack processor, chain,
//! aggregator — against the in-memory store and mock channel.
//!
//! Run with: cargo test --test engine

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use campd::bootstrap::{Engine, EngineEvent};
use campd::channel::{AckLevel, MockChannel};
use campd::clock::{ManualClock, SystemClock};
use campd::config::Config;
use campd::campaign::{CampaignSpec, CampaignStep};
use campd::schedule::ChainDelay;
use campd::store::{
    BatchStatus, MemoryStorage, MessageStatus, SharedStorage,
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    engine: Engine,
    store: SharedStorage,
    channel: Arc<MockChannel>,
}

fn harness_with(config: Config, channel: MockChannel) -> Harness {
    let store: SharedStorage = Arc::new(MemoryStorage::new());
    let channel = Arc::new(channel);
    let mut engine = Engine::new(
        Arc::new(config),
        store.clone(),
        channel.clone(),
        Arc::new(SystemClock),
    )
    .expect("engine config");
    engine.start().expect("engine start");

    Harness {
        engine,
        store,
        channel,
    }
}

fn harness() -> Harness {
    harness_with(
        Config::single_queue("default", Duration::ZERO),
        MockChannel::new(Duration::ZERO, None, true),
    )
}

fn spec(recipients: &[&str], steps: Vec<CampaignStep>) -> CampaignSpec {
    CampaignSpec {
        name: "test-campaign".into(),
        queue: "default".into(),
        recipients: recipients.iter().map(|r| r.to_string()).collect(),
        steps,
    }
}

async fn wait_for<F>(rx: &mut broadcast::Receiver<EngineEvent>, mut pred: F) -> EngineEvent
where
    F: FnMut(&EngineEvent) -> bool,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            let event = rx.recv().await.expect("event bus closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn single_step_campaign_sends_and_completes() {
    let h = harness();
    let mut events = h.engine.subscribe();

    let batch_id = h
        .engine
        .submit(spec(
            &["+1555", "+1556", "+1557"],
            vec![CampaignStep::immediate("hello")],
        ))
        .unwrap();

    wait_for(&mut events, |e| {
        matches!(e, EngineEvent::BatchCompleted { batch_id: b } if *b == batch_id)
    })
    .await;

    let batch = h.store.get_batch(batch_id).unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.counts.total, 3);
    assert_eq!(batch.counts.processed(), 3);
    assert_eq!(h.channel.sent_count(), 3);

    for msg in h.store.batch_members(batch_id) {
        assert_eq!(msg.status, MessageStatus::Sent);
        assert!(msg.sent_at.is_some());
        assert!(msg.external_id.is_some());
        assert!(msg.error.is_none());
    }

    h.engine.stop().await;
}

#[tokio::test]
async fn follow_up_sent_only_after_parent() {
    let h = harness();
    let mut events = h.engine.subscribe();

    let batch_id = h
        .engine
        .submit(spec(
            &["+1555"],
            vec![
                CampaignStep::immediate("first"),
                CampaignStep::immediate("second").with_delay(ChainDelay::seconds(0)),
            ],
        ))
        .unwrap();

    wait_for(&mut events, |e| {
        matches!(e, EngineEvent::BatchCompleted { batch_id: b } if *b == batch_id)
    })
    .await;

    let members = h.store.batch_members(batch_id);
    let parent = members.iter().find(|m| m.parent_id.is_none()).unwrap();
    let dep = members.iter().find(|m| m.parent_id.is_some()).unwrap();

    assert_eq!(parent.status, MessageStatus::Sent);
    assert_eq!(dep.status, MessageStatus::Sent);
    assert_eq!(dep.parent_id, Some(parent.id));
    // The dependent's send time was computed from the parent's actual
    // send, so it can never precede it.
    assert!(dep.send_at >= parent.sent_at.unwrap());
    assert!(dep.sent_at >= parent.sent_at);

    h.engine.stop().await;
}

#[tokio::test]
async fn failed_parent_cancels_dependent() {
    // Every send fails.
    let h = harness_with(
        Config::single_queue("default", Duration::ZERO),
        MockChannel::new(Duration::ZERO, Some(1), false),
    );
    let mut events = h.engine.subscribe();

    let batch_id = h
        .engine
        .submit(spec(
            &["+1555"],
            vec![
                CampaignStep::immediate("first"),
                CampaignStep::immediate("second").with_delay(ChainDelay::days(30)),
            ],
        ))
        .unwrap();

    wait_for(&mut events, |e| {
        matches!(e, EngineEvent::BatchCompleted { batch_id: b } if *b == batch_id)
    })
    .await;

    let members = h.store.batch_members(batch_id);
    let parent = members.iter().find(|m| m.parent_id.is_none()).unwrap();
    let dep = members.iter().find(|m| m.parent_id.is_some()).unwrap();

    assert_eq!(parent.status, MessageStatus::Failed);
    assert!(parent.error.as_deref().unwrap().contains("simulated"));

    assert_eq!(dep.status, MessageStatus::Cancelled);
    let reason = dep.cancel_reason.as_deref().unwrap();
    assert!(reason.contains(&parent.id.to_string()));
    assert!(reason.contains("failed"));

    // Failed parent processed, cancelled dependent excluded.
    let batch = h.store.get_batch(batch_id).unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.counts.failed, 1);
    assert_eq!(batch.counts.cancelled, 1);
    assert_eq!(batch.counts.effective_total(), 1);

    h.engine.stop().await;
}

#[tokio::test]
async fn one_failure_does_not_stop_the_loop() {
    // Second send fails, the rest succeed.
    let h = harness_with(
        Config::single_queue("default", Duration::ZERO),
        MockChannel::new(Duration::ZERO, Some(2), false),
    );
    let mut events = h.engine.subscribe();

    let batch_id = h
        .engine
        .submit(spec(
            &["+1555", "+1556", "+1557"],
            vec![CampaignStep::immediate("hello")],
        ))
        .unwrap();

    wait_for(&mut events, |e| {
        matches!(e, EngineEvent::BatchCompleted { batch_id: b } if *b == batch_id)
    })
    .await;

    let batch = h.store.get_batch(batch_id).unwrap();
    assert_eq!(batch.counts.sent, 2);
    assert_eq!(batch.counts.failed, 1);
    assert_eq!(batch.counts.processed(), 3);

    h.engine.stop().await;
}

#[tokio::test]
async fn acks_advance_lifecycle_to_read() {
    let h = harness();
    let mut events = h.engine.subscribe();

    let batch_id = h
        .engine
        .submit(spec(&["+1555"], vec![CampaignStep::immediate("hello")]))
        .unwrap();

    let sent = wait_for(&mut events, |e| {
        matches!(
            e,
            EngineEvent::MessageStatusChanged {
                status: MessageStatus::Sent,
                ..
            }
        )
    })
    .await;
    let EngineEvent::MessageStatusChanged { message_id, .. } = sent else {
        unreachable!();
    };

    let external_id = h.store.get(message_id).unwrap().external_id.unwrap();

    // Delivery receipts arrive out of order; the status never regresses.
    h.channel.emit_ack(external_id.clone(), AckLevel::Read);
    h.channel.emit_ack(external_id.clone(), AckLevel::Delivered);

    wait_for(&mut events, |e| {
        matches!(
            e,
            EngineEvent::MessageStatusChanged {
                status: MessageStatus::Read,
                ..
            }
        )
    })
    .await;

    // Give the stale delivered ack a chance to be (wrongly) applied.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let msg = h.store.get(message_id).unwrap();
    assert_eq!(msg.status, MessageStatus::Read);
    assert!(msg.sent_at <= msg.delivered_at);
    assert!(msg.delivered_at <= msg.read_at);

    let batch = h.store.get_batch(batch_id).unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);

    h.engine.stop().await;
}

#[tokio::test]
async fn cancel_batch_stops_pending_sends() {
    // Wide pacing so only the first message goes out immediately.
    let h = harness_with(
        Config::single_queue("default", Duration::from_secs(30)),
        MockChannel::new(Duration::ZERO, None, false),
    );
    let mut events = h.engine.subscribe();

    let batch_id = h
        .engine
        .submit(spec(
            &["+1555", "+1556", "+1557"],
            vec![CampaignStep::immediate("hello")],
        ))
        .unwrap();

    wait_for(&mut events, |e| {
        matches!(
            e,
            EngineEvent::MessageStatusChanged {
                status: MessageStatus::Sent,
                ..
            }
        )
    })
    .await;

    h.engine
        .state()
        .aggregator
        .cancel_batch(batch_id, "operator cancelled")
        .unwrap();

    wait_for(&mut events, |e| {
        matches!(e, EngineEvent::BatchCancelled { batch_id: b } if *b == batch_id)
    })
    .await;

    let batch = h.store.get_batch(batch_id).unwrap();
    assert_eq!(batch.status, BatchStatus::Cancelled);
    assert_eq!(batch.counts.sent, 1);
    assert_eq!(batch.counts.cancelled, 2);
    assert_eq!(h.channel.sent_count(), 1);

    h.engine.stop().await;
}

#[tokio::test]
async fn closed_window_holds_sends_until_open() {
    let yaml = r#"
queues:
  - name: default
    window:
      start_hour: 9
      end_hour: 17
      end_minute: 0
    interval: 0s
"#;
    let config = Config::from_yaml(yaml).unwrap();

    // 08:59, one minute before the window opens.
    let clock = ManualClock::new(
        chrono::DateTime::parse_from_rfc3339("2024-03-01T08:59:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc),
    );

    let store: SharedStorage = Arc::new(MemoryStorage::new());
    let channel = Arc::new(MockChannel::new(Duration::ZERO, None, false));
    let mut engine = Engine::new(Arc::new(config), store.clone(), channel.clone(), clock.clone())
        .expect("engine config");
    engine.start().expect("engine start");
    let mut events = engine.subscribe();

    engine
        .submit(spec(&["+1555"], vec![CampaignStep::immediate("hello")]))
        .unwrap();

    // Outside the window nothing is dispatched.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(channel.sent_count(), 0);

    // The clock reaches 09:00; wake the worker for its re-check.
    clock.advance(chrono::Duration::minutes(1));
    engine.wake("default");

    wait_for(&mut events, |e| {
        matches!(
            e,
            EngineEvent::MessageStatusChanged {
                status: MessageStatus::Sent,
                ..
            }
        )
    })
    .await;
    assert_eq!(channel.sent_count(), 1);

    engine.stop().await;
}

#[tokio::test]
async fn engine_stops_cleanly() {
    let h = harness();
    let mut events = h.engine.subscribe();

    h.engine
        .submit(spec(&["+1555"], vec![CampaignStep::immediate("bye")]))
        .unwrap();
    wait_for(&mut events, |e| {
        matches!(e, EngineEvent::BatchCompleted { .. })
    })
    .await;

    // stop() drains and joins every task within the drain timeout.
    h.engine.stop().await;
}
