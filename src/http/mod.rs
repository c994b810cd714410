//! HTTP surface: work status, manual triggers, job history, event stream.

pub mod error;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bus::EventBus;
use crate::completion::CompletionTracker;
use crate::db::Db;
use crate::engine::Engine;
use crate::error::Result;
use crate::queue::JobQueue;
use crate::registry::Registry;

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// Shared state passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub tracker: Arc<CompletionTracker>,
    pub queue: JobQueue,
    pub bus: Arc<EventBus>,
    pub db: Db,
    /// Interval between heartbeat frames on event streams.
    pub heartbeat: Duration,
    /// Cancelled at shutdown; open event streams end with it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn from_engine(engine: &Engine, heartbeat: Duration) -> Self {
        Self {
            registry: Arc::clone(engine.registry()),
            tracker: Arc::clone(engine.tracker()),
            queue: engine.queue().clone(),
            bus: Arc::clone(engine.bus()),
            db: engine.db().clone(),
            heartbeat,
            shutdown: engine.shutdown_token(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/work/status", get(routes::work_status))
        .route("/api/work/trigger", post(routes::trigger_work))
        .route("/api/jobs/history", get(routes::job_history))
        .route("/api/jobs/pending", get(routes::pending_jobs))
        .route("/api/jobs/{id}", get(routes::get_job))
        .route("/api/events", get(routes::event_stream))
        .with_state(state)
}

/// Serve the API on `addr` until the state's shutdown token is cancelled.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "http server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
