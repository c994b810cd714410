use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::StreamExt as _;
use serde::Deserialize;
use tokio_stream::wrappers::IntervalStream;

use super::AppState;
use super::error::AppError;
use crate::event::{Event, EventType};
use crate::model::job::{JobId, NewJob};
use crate::model::work::Priority;
use crate::status;

/// History entries returned when the caller doesn't ask for a limit.
const DEFAULT_HISTORY_LIMIT: usize = 50;

/// GET /api/health
pub async fn health(State(app): State<AppState>) -> Response {
    match app.db.health_check().await {
        Ok(()) => Json(serde_json::json!({ "status": "ok" })).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "unavailable", "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// GET /api/work/status: one row per work type, registry order.
pub async fn work_status(State(app): State<AppState>) -> Json<Vec<status::WorkTypeStatus>> {
    Json(status::snapshot(&app.registry, &app.tracker))
}

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub work_type: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub payload: Option<serde_json::Map<String, serde_json::Value>>,
    pub priority: Option<Priority>,
    pub max_retries: Option<u32>,
}

/// POST /api/work/trigger: enqueue a job and return without waiting for it.
pub async fn trigger_work(
    State(app): State<AppState>,
    Json(req): Json<TriggerRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let mut new = NewJob::new(req.work_type).subject(req.subject);
    if let Some(payload) = req.payload {
        new = new.payload(payload);
    }
    if let Some(priority) = req.priority {
        new = new.priority(priority);
    }
    if let Some(n) = req.max_retries {
        new = new.max_retries(n);
    }

    let job = app.queue.enqueue(new).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "queued", "job_id": job.id.to_string() })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// GET /api/jobs/history?limit=N: most recent dispatches first.
pub async fn job_history(
    State(app): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<crate::model::job::JobRun>>, AppError> {
    let runs = app
        .queue
        .history(query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
        .await?;
    Ok(Json(runs))
}

/// GET /api/jobs/pending
pub async fn pending_jobs(
    State(app): State<AppState>,
) -> Result<Json<Vec<crate::model::job::Job>>, AppError> {
    Ok(Json(app.queue.pending().await?))
}

/// GET /api/jobs/{id}
pub async fn get_job(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::model::job::Job>, AppError> {
    let id: JobId = id
        .parse()
        .map_err(|_| AppError::bad_request(format!("invalid job id: {id}")))?;
    Ok(Json(app.queue.get(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Comma-separated event types. Omitted or empty = all.
    pub types: Option<String>,
}

/// GET /api/events?types=a,b: newline-delimited JSON event stream.
///
/// Opens with a `connected` frame, then forwards matching events and a
/// `heartbeat` frame on every heartbeat tick. Ends when the server shuts down.
pub async fn event_stream(
    State(app): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Response, AppError> {
    let filter = parse_event_types(query.types.as_deref())?;
    let subscription = app.bus.subscribe(filter);

    let heartbeat = app.heartbeat.max(Duration::from_millis(10));
    let ticks = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
    let heartbeats = IntervalStream::new(ticks).map(|_| Event::heartbeat());

    let frames = futures::stream::once(async { Event::connected() })
        .chain(futures::stream::select(subscription.into_stream(), heartbeats))
        .take_until(app.shutdown.clone().cancelled_owned())
        .map(|event| Ok::<_, Infallible>(ndjson_frame(&event)));

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(frames),
    )
        .into_response())
}

fn parse_event_types(raw: Option<&str>) -> Result<Vec<EventType>, AppError> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<EventType>()
                .map_err(|_| AppError::bad_request(format!("unknown event type: {s}")))
        })
        .collect()
}

fn ndjson_frame(event: &Event) -> String {
    match serde_json::to_string(event) {
        Ok(mut line) => {
            line.push('\n');
            line
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode event frame");
            String::new()
        }
    }
}
