//! Integration tests for the event bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt as _;
use portfolio_work::bus::EventBus;
use portfolio_work::event::EventType;
use serde_json::json;

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn subscriber_receives_matching_events_only() {
    let bus = EventBus::new(8);
    let mut jobs = bus.subscribe([EventType::JobEnqueued, EventType::JobFailed]);
    let mut everything = bus.subscribe([]);

    assert_eq!(bus.emit(EventType::WorkStarted, "processor", json!({"item": "a"})), 1);
    assert_eq!(bus.emit(EventType::JobEnqueued, "queue", json!({"job_id": "1"})), 2);

    let event = jobs.recv().await.unwrap();
    assert_eq!(event.event_type, EventType::JobEnqueued);
    assert_eq!(event.module, "queue");
    assert_eq!(event.data["job_id"], "1");
    assert!(jobs.try_recv().is_none());

    assert_eq!(everything.recv().await.unwrap().event_type, EventType::WorkStarted);
    assert_eq!(everything.recv().await.unwrap().event_type, EventType::JobEnqueued);
}

#[tokio::test]
async fn events_arrive_in_publish_order() {
    let bus = EventBus::new(16);
    let mut sub = bus.subscribe([EventType::WorkProgress]);
    for i in 0..10 {
        bus.emit(EventType::WorkProgress, "progress", json!({ "n": i }));
    }
    for i in 0..10 {
        assert_eq!(sub.recv().await.unwrap().data["n"], i);
    }
}

#[tokio::test]
async fn full_subscriber_drops_without_blocking_others() {
    let bus = EventBus::new(2);
    let mut slow = bus.subscribe([]);
    let mut fast = bus.subscribe([]);

    for i in 0..3 {
        bus.emit(EventType::Heartbeat, "events", json!({ "n": i }));
        // Keep the fast subscriber drained.
        assert_eq!(fast.recv().await.unwrap().data["n"], i);
    }

    assert_eq!(bus.dropped_count(), 1);
    assert_eq!(slow.recv().await.unwrap().data["n"], 0);
    assert_eq!(slow.recv().await.unwrap().data["n"], 1);
    assert!(slow.try_recv().is_none(), "third event was dropped for the slow subscriber");
    assert_eq!(bus.subscriber_count(), 2, "full subscribers stay subscribed");
}

#[tokio::test]
async fn unsubscribe_ends_the_stream() {
    let bus = EventBus::new(4);
    let sub = bus.subscribe([]);
    let id = sub.id;
    let mut stream = sub.into_stream();

    bus.emit(EventType::Connected, "events", json!({}));
    assert!(bus.unsubscribe(id));
    assert!(!bus.unsubscribe(id));

    assert_eq!(stream.next().await.unwrap().event_type, EventType::Connected);
    assert!(stream.next().await.is_none());
    assert_eq!(bus.emit(EventType::Connected, "events", json!({})), 0);
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn on_runs_handler_for_each_event() {
    let bus = EventBus::new(8);
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let id = bus.on(EventType::JobCompleted, move |_event| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    bus.emit(EventType::JobCompleted, "queue", json!({}));
    bus.emit(EventType::JobFailed, "queue", json!({}));
    bus.emit(EventType::JobCompleted, "queue", json!({}));

    tokio::time::timeout(Duration::from_secs(2), async {
        while seen.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 2);

    bus.unsubscribe(id);
    assert_eq!(bus.emit(EventType::JobCompleted, "queue", json!({})), 0);
}
