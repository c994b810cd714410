//! Throttled progress reporting for running work.
//!
//! A [`ProgressReporter`] is the narrow capability a task body gets for
//! telling observers how far along it is. Reports are rate-limited so a
//! tight loop can't flood the bus; the final report (`current == total`)
//! and explicit milestones always go through.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::bus::EventBus;
use crate::event::EventType;
use crate::model::work::WorkItem;

/// Minimum time between two throttled reports.
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(100);

/// Payload of a `work_progress` event.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Progress {
    pub current: u64,
    pub total: u64,
    pub message: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub phase: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sub_phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Progress {
    pub fn new(current: u64, total: u64, message: impl Into<String>) -> Self {
        Self {
            current,
            total,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = phase.into();
        self
    }

    pub fn sub_phase(mut self, sub_phase: impl Into<String>) -> Self {
        self.sub_phase = sub_phase.into();
        self
    }

    pub fn details(mut self, details: serde_json::Map<String, serde_json::Value>) -> Self {
        self.details = Some(details);
        self
    }

    fn is_final(&self) -> bool {
        self.total > 0 && self.current >= self.total
    }
}

struct Inner {
    bus: Arc<EventBus>,
    item: WorkItem,
    description: String,
    throttle: Duration,
    last_sent: Mutex<Option<Instant>>,
}

/// Reports progress for one work item. Cheap to clone; clones share the throttle.
#[derive(Clone)]
pub struct ProgressReporter {
    inner: Option<Arc<Inner>>,
}

impl ProgressReporter {
    pub fn new(bus: Arc<EventBus>, item: WorkItem, description: impl Into<String>) -> Self {
        Self::with_throttle(bus, item, description, DEFAULT_THROTTLE)
    }

    pub fn with_throttle(
        bus: Arc<EventBus>,
        item: WorkItem,
        description: impl Into<String>,
        throttle: Duration,
    ) -> Self {
        Self {
            inner: Some(Arc::new(Inner {
                bus,
                item,
                description: description.into(),
                throttle,
                last_sent: Mutex::new(None),
            })),
        }
    }

    /// A reporter that discards everything.
    pub fn noop() -> Self {
        Self { inner: None }
    }

    /// Report `current` of `total` steps. Throttled unless this is the last step.
    pub fn report(&self, current: u64, total: u64, message: impl Into<String>) {
        self.send(Progress::new(current, total, message), false);
    }

    /// Report a status message without step counts. Throttled.
    pub fn report_message(&self, message: impl Into<String>) {
        self.send(Progress::new(0, 0, message), false);
    }

    /// Report a fully populated update. Throttled unless final.
    pub fn report_progress(&self, progress: Progress) {
        self.send(progress, false);
    }

    /// Report a milestone that must not be swallowed by the throttle.
    pub fn report_unthrottled(&self, progress: Progress) {
        self.send(progress, true);
    }

    fn send(&self, progress: Progress, force: bool) {
        let Some(inner) = &self.inner else {
            return;
        };

        {
            let mut last = inner
                .last_sent
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = Instant::now();
            let throttled = last.is_some_and(|at| now.duration_since(at) < inner.throttle);
            if throttled && !force && !progress.is_final() {
                return;
            }
            *last = Some(now);
        }

        let data = serde_json::json!({
            "item": inner.item.id(),
            "work_type": inner.item.work_type,
            "subject": inner.item.subject,
            "description": inner.description,
            "progress": progress,
        });
        inner.bus.emit(EventType::WorkProgress, "progress", data);
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some(inner) => f
                .debug_struct("ProgressReporter")
                .field("item", &inner.item)
                .field("throttle", &inner.throttle)
                .finish(),
            None => f.write_str("ProgressReporter(noop)"),
        }
    }
}
