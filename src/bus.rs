//! In-process publish/subscribe hub for [`Event`]s.
//!
//! Each subscriber owns a bounded channel. Publishing never blocks: when a
//! subscriber's channel is full the event is dropped for that subscriber
//! only, with a warning and a bump of the dropped-events counter. Closed
//! subscribers are pruned on the next emit.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::event::{Event, EventType};
use crate::telemetry::metrics;

pub const DEFAULT_BUFFER: usize = 64;

/// Subscriber handle id.
pub type SubscriberId = u64;

struct Subscriber {
    /// Empty = all event types.
    filter: HashSet<EventType>,
    tx: mpsc::Sender<Event>,
}

impl Subscriber {
    fn wants(&self, event_type: EventType) -> bool {
        self.filter.is_empty() || self.filter.contains(&event_type)
    }
}

/// The receiving end of a subscription.
pub struct Subscription {
    pub id: SubscriberId,
    rx: mpsc::Receiver<Event>,
}

impl Subscription {
    /// Next event, or `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    pub fn into_stream(self) -> ReceiverStream<Event> {
        ReceiverStream::new(self.rx)
    }
}

pub struct EventBus {
    subscribers: DashMap<SubscriberId, Subscriber>,
    next_id: AtomicU64,
    buffer: usize,
    dropped: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl EventBus {
    /// Create a bus whose subscribers each buffer up to `buffer` events.
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Subscribe to the given event types. An empty filter receives everything.
    pub fn subscribe<I>(&self, filter: I) -> Subscription
    where
        I: IntoIterator<Item = EventType>,
    {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(
            id,
            Subscriber {
                filter: filter.into_iter().collect(),
                tx,
            },
        );
        debug!(subscriber = id, "subscribed");
        Subscription { id, rx }
    }

    /// Run `handler` on its own task for every event of `event_type`.
    ///
    /// Must be called from within a tokio runtime. The task ends when the
    /// returned id is unsubscribed.
    pub fn on<F, Fut>(&self, event_type: EventType, handler: F) -> SubscriberId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut sub = self.subscribe([event_type]);
        let id = sub.id;
        tokio::spawn(async move {
            while let Some(event) = sub.recv().await {
                handler(event).await;
            }
        });
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Total events dropped across all subscribers because of full channels.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Publish an event. Returns the number of subscribers it was delivered to.
    pub fn emit(&self, event_type: EventType, module: &str, data: serde_json::Value) -> usize {
        self.publish(Event::new(event_type, module, data))
    }

    pub fn publish(&self, event: Event) -> usize {
        let mut delivered = 0;
        self.subscribers.retain(|id, sub| {
            if !sub.wants(event.event_type) {
                return true;
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    metrics::events_dropped()
                        .add(1, &[opentelemetry::KeyValue::new("type", event.event_type.as_str())]);
                    warn!(
                        subscriber = *id,
                        event_type = %event.event_type,
                        "subscriber channel full, dropping event"
                    );
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = *id, "subscriber closed, removing");
                    false
                }
            }
        });
        delivered
    }
}
