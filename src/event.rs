//! Structured events published on every work and job state transition.
//!
//! Consumers subscribe through the [`EventBus`](crate::bus::EventBus) to
//! build dashboards, alerting, or audit logs. Events are the engine's voice;
//! `tracing` logs are the operator's.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Enumerated event topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WorkStarted,
    WorkProgress,
    WorkCompleted,
    WorkFailed,
    JobEnqueued,
    JobStarted,
    JobCompleted,
    JobRetrying,
    JobFailed,
    /// Synthetic frame opening an event stream.
    Connected,
    /// Keep-alive frame on idle streams.
    Heartbeat,
}

impl EventType {
    pub const ALL: [EventType; 11] = [
        EventType::WorkStarted,
        EventType::WorkProgress,
        EventType::WorkCompleted,
        EventType::WorkFailed,
        EventType::JobEnqueued,
        EventType::JobStarted,
        EventType::JobCompleted,
        EventType::JobRetrying,
        EventType::JobFailed,
        EventType::Connected,
        EventType::Heartbeat,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::WorkStarted => "work_started",
            EventType::WorkProgress => "work_progress",
            EventType::WorkCompleted => "work_completed",
            EventType::WorkFailed => "work_failed",
            EventType::JobEnqueued => "job_enqueued",
            EventType::JobStarted => "job_started",
            EventType::JobCompleted => "job_completed",
            EventType::JobRetrying => "job_retrying",
            EventType::JobFailed => "job_failed",
            EventType::Connected => "connected",
            EventType::Heartbeat => "heartbeat",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::Other(format!("unknown event type: {s}")))
    }
}

/// A published event. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Component that emitted the event, e.g. `"processor"` or `"queue"`.
    pub module: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(event_type: EventType, module: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type,
            module: module.into(),
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn connected() -> Self {
        Self::new(
            EventType::Connected,
            "events",
            serde_json::json!({ "status": "connected" }),
        )
    }

    pub fn heartbeat() -> Self {
        Self::new(EventType::Heartbeat, "events", serde_json::json!({}))
    }
}
