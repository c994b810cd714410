//! Orchestration engine: scheduling loop, job queue sweep, shared worker pool.
//!
//! [`Engine`] wires the pieces together and owns their lifecycle: start the
//! loops, then on shutdown cancel them, give in-flight work a grace period,
//! and abandon whatever is still running after it.

pub mod executor;
pub mod pool;
pub mod processor;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::completion::CompletionTracker;
use crate::db::Db;
use crate::error::Result;
use crate::market::MarketTimingGate;
use crate::queue::{JobQueue, QueueConfig};
use crate::registry::Registry;

pub use executor::{Dispatch, ExecutionPath, Executor, Outcome};
pub use pool::{Claim, WorkerPool};
pub use processor::Processor;

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_workers: usize,
    /// Fallback tick for the scheduling loop.
    pub poll_interval: Duration,
    pub execution_timeout: Duration,
    /// How long in-flight work may keep running after shutdown starts.
    pub shutdown_grace: Duration,
    pub queue: QueueConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval: processor::DEFAULT_POLL_INTERVAL,
            execution_timeout: executor::DEFAULT_TIMEOUT,
            shutdown_grace: Duration::from_secs(10),
            queue: QueueConfig::default(),
        }
    }
}

/// The running system: registry, completion history, processor, and queue.
pub struct Engine {
    registry: Arc<Registry>,
    tracker: Arc<CompletionTracker>,
    bus: Arc<EventBus>,
    db: Db,
    pool: WorkerPool,
    executor: Executor,
    processor: Processor,
    queue: JobQueue,
    config: EngineConfig,
    shutdown: CancellationToken,
    loops: TaskTracker,
}

impl Engine {
    /// Build an engine over `db`, restoring completion history from it.
    pub async fn new(
        db: Db,
        registry: Registry,
        gate: MarketTimingGate,
        bus: Arc<EventBus>,
        config: EngineConfig,
    ) -> Result<Self> {
        let tracker = Arc::new(CompletionTracker::load(db.clone()).await?);
        Ok(Self::with_tracker(db, registry, tracker, gate, bus, config))
    }

    /// Build an engine with an explicit completion tracker.
    pub fn with_tracker(
        db: Db,
        registry: Registry,
        tracker: Arc<CompletionTracker>,
        gate: MarketTimingGate,
        bus: Arc<EventBus>,
        config: EngineConfig,
    ) -> Self {
        let registry = Arc::new(registry);
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::new(config.max_workers);
        let executor = Executor::new(
            Arc::clone(&bus),
            Arc::clone(&tracker),
            config.execution_timeout,
            shutdown.clone(),
        );
        let processor = Processor::new(
            Arc::clone(&registry),
            gate,
            pool.clone(),
            executor.clone(),
            config.poll_interval,
            shutdown.clone(),
        );
        let queue = JobQueue::new(
            db.clone(),
            Arc::clone(&registry),
            pool.clone(),
            executor.clone(),
            config.queue.clone(),
            shutdown.clone(),
        )
        .with_scheduler(processor.clone());

        Self {
            registry,
            tracker,
            bus,
            db,
            pool,
            executor,
            processor,
            queue,
            config,
            shutdown,
            loops: TaskTracker::new(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<CompletionTracker> {
        &self.tracker
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Token cancelled when shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Recover interrupted jobs, then start the scheduling loop and the
    /// queue sweep in the background.
    pub async fn start(&self) -> Result<()> {
        self.queue.recover().await?;

        let processor = self.processor.clone();
        self.loops.spawn(async move { processor.run().await });
        let queue = self.queue.clone();
        self.loops.spawn(async move { queue.run().await });

        info!(
            max_workers = self.pool.capacity(),
            work_types = self.registry.len(),
            "engine started"
        );
        Ok(())
    }

    /// Stop both loops and wait up to the grace period for in-flight work.
    /// Results of work still running after that are discarded.
    pub async fn shutdown(&self) {
        info!(in_flight = self.pool.in_flight_count(), "engine shutting down");
        self.shutdown.cancel();

        self.loops.close();
        self.loops.wait().await;

        self.pool.close();
        if tokio::time::timeout(self.config.shutdown_grace, self.pool.wait())
            .await
            .is_err()
        {
            self.executor.abandon();
            warn!(
                in_flight = self.pool.in_flight_count(),
                grace_secs = self.config.shutdown_grace.as_secs(),
                "grace period elapsed, abandoning in-flight work"
            );
        }
        info!("engine stopped");
    }
}
