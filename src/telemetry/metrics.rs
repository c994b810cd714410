//! Metric instrument factories for portfolio-work.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"portfolio-work"` meter.
//! Without a provider (no `OTEL_ENDPOINT`) they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for portfolio-work instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("portfolio-work")
}

/// Counter: work executions finished.
/// Labels: `work_type`, `path` ("scheduled" | "manual"), `result` ("ok" | "error" | "timeout").
pub fn work_executions() -> Counter<u64> {
    meter()
        .u64_counter("portfolio.work.executions")
        .with_description("Number of work executions")
        .build()
}

/// Counter: job queue operations.
/// Labels: `work_type`, `operation` ("enqueue" | "dispatch" | "complete" | "retry" | "fail").
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("portfolio.queue.operations")
        .with_description("Number of job queue operations")
        .build()
}

/// Counter: events dropped because a subscriber's channel was full.
/// Labels: `type`.
pub fn events_dropped() -> Counter<u64> {
    meter()
        .u64_counter("portfolio.events.dropped")
        .with_description("Events dropped for slow subscribers")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`, `work_type`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("portfolio.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
