//! The single execution primitive used by both the scheduler and the job queue.
//!
//! Running a work item means: announce it, hand the body a cancellation
//! token and progress reporter, bound it with a timeout, then record the
//! completion (on success) and announce the result. Isolating panics here
//! keeps one misbehaving body from taking a worker down with it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use opentelemetry::KeyValue;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};

use crate::bus::EventBus;
use crate::completion::CompletionTracker;
use crate::event::EventType;
use crate::model::job::JobId;
use crate::model::work::{WorkContext, WorkItem, WorkType};
use crate::progress::ProgressReporter;
use crate::telemetry::metrics;
use crate::telemetry::work::{record_state_transition, start_work_span};

/// Default upper bound on one execution.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Which path dispatched an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
    Scheduled,
    Manual,
}

impl ExecutionPath {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionPath::Scheduled => "scheduled",
            ExecutionPath::Manual => "manual",
        }
    }

    /// Event `module` for executions on this path.
    pub fn module(self) -> &'static str {
        match self {
            ExecutionPath::Scheduled => "processor",
            ExecutionPath::Manual => "queue",
        }
    }
}

/// How an execution was dispatched.
#[derive(Debug, Clone, Copy)]
pub struct Dispatch {
    pub path: ExecutionPath,
    pub job_id: Option<JobId>,
    pub attempt: u32,
}

impl Dispatch {
    pub fn scheduled() -> Self {
        Self {
            path: ExecutionPath::Scheduled,
            job_id: None,
            attempt: 1,
        }
    }

    pub fn manual(job_id: JobId, attempt: u32) -> Self {
        Self {
            path: ExecutionPath::Manual,
            job_id: Some(job_id),
            attempt,
        }
    }
}

/// Result of one execution.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub timed_out: bool,
    /// Finished after shutdown gave up on it. Nothing was recorded.
    pub discarded: bool,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.discarded
    }
}

/// Runs work bodies. Cheap to clone; clones share the abandon flag.
#[derive(Clone)]
pub struct Executor {
    bus: Arc<EventBus>,
    tracker: Arc<CompletionTracker>,
    timeout: Duration,
    shutdown: CancellationToken,
    abandoned: Arc<AtomicBool>,
}

impl Executor {
    pub fn new(
        bus: Arc<EventBus>,
        tracker: Arc<CompletionTracker>,
        timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            bus,
            tracker,
            timeout,
            shutdown,
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn tracker(&self) -> &Arc<CompletionTracker> {
        &self.tracker
    }

    /// Discard the results of every execution still running.
    pub fn abandon(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Execute `item` once. The caller must hold the item's pool claim.
    /// `payload` is handed to the body unchanged.
    pub async fn execute(
        &self,
        work_type: &WorkType,
        item: &WorkItem,
        dispatch: Dispatch,
        payload: serde_json::Map<String, serde_json::Value>,
    ) -> Outcome {
        let path = dispatch.path;
        let span = start_work_span(&work_type.id, &item.subject, path.as_str());

        async {
            let started_at = Utc::now();
            let start = Instant::now();

            self.bus.emit(
                EventType::WorkStarted,
                path.module(),
                event_data(item, &dispatch, serde_json::Map::new()),
            );
            record_state_transition(&span, "selected", "running");

            let cancel = self.shutdown.child_token();
            let ctx = WorkContext {
                subject: item.subject.clone(),
                cancel: cancel.clone(),
                progress: ProgressReporter::new(
                    Arc::clone(&self.bus),
                    item.clone(),
                    work_type.description.clone(),
                ),
                payload,
            };

            let body = AssertUnwindSafe(work_type.execute(ctx)).catch_unwind();
            let (error, result) = match tokio::time::timeout(self.timeout, body).await {
                Ok(Ok(Ok(()))) => (None, "ok"),
                Ok(Ok(Err(e))) => (Some(format!("{e:#}")), "error"),
                Ok(Err(_)) => (Some("task panicked".to_string()), "panic"),
                Err(_) => {
                    cancel.cancel();
                    (
                        Some(format!("timed out after {}s", self.timeout.as_secs())),
                        "timeout",
                    )
                }
            };

            let finished_at = Utc::now();
            let duration_ms = start.elapsed().as_millis() as u64;
            let mut outcome = Outcome {
                started_at,
                finished_at,
                duration_ms,
                timed_out: result == "timeout",
                error,
                discarded: false,
            };

            if self.is_abandoned() {
                warn!(item = %item, duration_ms, "finished after shutdown grace period, discarding result");
                outcome.discarded = true;
                return outcome;
            }

            metrics::work_executions().add(
                1,
                &[
                    KeyValue::new("work_type", work_type.id.clone()),
                    KeyValue::new("path", path.as_str()),
                    KeyValue::new("result", result),
                ],
            );
            metrics::operation_duration_ms().record(
                duration_ms as f64,
                &[
                    KeyValue::new("operation", "work.execute"),
                    KeyValue::new("work_type", work_type.id.clone()),
                ],
            );

            let mut extra = serde_json::Map::new();
            extra.insert("duration_ms".into(), duration_ms.into());
            match &outcome.error {
                None => {
                    if let Err(e) = self.tracker.mark_completed_at(item, finished_at).await {
                        error!(item = %item, error = %e, "failed to persist completion");
                    }
                    record_state_transition(&span, "running", "completed");
                    info!(item = %item, duration_ms, "work completed");
                    self.bus
                        .emit(EventType::WorkCompleted, path.module(), event_data(item, &dispatch, extra));
                }
                Some(err) => {
                    record_state_transition(&span, "running", "failed");
                    warn!(item = %item, duration_ms, error = %err, "work failed");
                    extra.insert("error".into(), err.clone().into());
                    self.bus
                        .emit(EventType::WorkFailed, path.module(), event_data(item, &dispatch, extra));
                }
            }

            outcome
        }
        .instrument(span.clone())
        .await
    }
}

fn event_data(
    item: &WorkItem,
    dispatch: &Dispatch,
    mut extra: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Value {
    extra.insert("item".into(), item.id().into());
    extra.insert("work_type".into(), item.work_type.clone().into());
    extra.insert("subject".into(), item.subject.clone().into());
    extra.insert("path".into(), dispatch.path.as_str().into());
    if let Some(job_id) = dispatch.job_id {
        extra.insert("job_id".into(), job_id.to_string().into());
        extra.insert("attempt".into(), dispatch.attempt.into());
    }
    serde_json::Value::Object(extra)
}
