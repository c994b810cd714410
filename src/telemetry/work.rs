//! Work execution span helpers.
//!
//! Provides span creation and state-transition recording for work items
//! and jobs flowing through the engine.

use tracing::Span;

use crate::model::job::JobId;

/// Start a span for one execution of a work item.
///
/// `path` is `"scheduled"` or `"manual"`. The `work.state` field is declared
/// empty and can be updated via [`record_state_transition`].
pub fn start_work_span(work_type: &str, subject: &str, path: &str) -> Span {
    tracing::info_span!(
        "work.execute",
        "work.type" = work_type,
        "work.subject" = subject,
        "work.path" = path,
        "work.state" = tracing::field::Empty,
    )
}

/// Start a span covering one dispatch of a queued job.
pub fn start_job_span(job_id: &JobId, work_type: &str, attempt: u32) -> Span {
    tracing::info_span!(
        "job.dispatch",
        "job.id" = %job_id,
        "job.work_type" = work_type,
        "job.attempt" = attempt,
    )
}

/// Record a state transition event on the given span.
///
/// Emits a tracing `info` event scoped to the span and updates `work.state`
/// where the span declares it.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("work.state", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
