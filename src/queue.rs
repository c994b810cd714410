//! Durable job queue for on-demand work with bounded, backed-off retries.
//!
//! Jobs are persisted in SQLite and dispatched by a single sweep (periodic,
//! plus a nudge on every enqueue) through the same worker pool and executor
//! as scheduled work. Manual jobs skip the interval and market-timing gates
//! but still refuse to run before their dependencies have ever completed.
//! A successful job nudges the scheduler so dependents waiting on it are
//! selected without waiting for the next poll.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use crate::db::Db;
use crate::engine::executor::{Dispatch, Executor};
use crate::engine::pool::{Claim, WorkerPool};
use crate::engine::processor::Processor;
use crate::error::{Error, Result};
use crate::event::EventType;
use crate::model::job::{Job, JobId, JobRun, JobStatus, NewJob, RunStatus};
use crate::registry::Registry;
use crate::telemetry::metrics;
use crate::telemetry::work::start_job_span;

/// Tunables for the job queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Retries after the first attempt before a job fails terminally.
    pub max_retries: u32,
    /// Delay before the first retry; doubles per retry.
    pub retry_base: Duration,
    /// Cap on the retry delay.
    pub retry_max: Duration,
    pub sweep_interval: Duration,
    /// Dispatch history entries kept.
    pub history_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base: Duration::from_millis(1000),
            retry_max: Duration::from_millis(300_000),
            sweep_interval: Duration::from_secs(1),
            history_limit: 100,
        }
    }
}

/// Attempts at recording a job's outcome before giving up on it.
const SETTLE_ATTEMPTS: u32 = 3;
const SETTLE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Error recorded against jobs found `running` at startup.
const INTERRUPTED: &str = "interrupted before finishing";

/// Delay before retry number `retry` (1-based): `min(base * 2^(retry-1), max)`.
pub fn retry_delay(retry: u32, base: Duration, max: Duration) -> Duration {
    let exp = retry.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exp).map_or(max, |d| d.min(max))
}

/// A job claimed for dispatch. Holds the worker claim for its work item.
#[derive(Debug)]
pub struct ClaimedJob {
    pub job: Job,
    claim: Claim,
}

/// The job queue. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct JobQueue {
    db: Db,
    registry: Arc<Registry>,
    pool: WorkerPool,
    executor: Executor,
    config: QueueConfig,
    scheduler: Option<Processor>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
}

impl JobQueue {
    pub fn new(
        db: Db,
        registry: Arc<Registry>,
        pool: WorkerPool,
        executor: Executor,
        config: QueueConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            registry,
            pool,
            executor,
            config,
            scheduler: None,
            wake: Arc::new(Notify::new()),
            shutdown,
        }
    }

    /// Trigger `scheduler` after every successful job.
    pub fn with_scheduler(mut self, scheduler: Processor) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Persist a new job. Rejects work types that aren't registered.
    pub async fn enqueue(&self, new: NewJob) -> Result<Job> {
        let Some(wt) = self.registry.get(&new.work_type) else {
            return Err(Error::UnknownWorkType(new.work_type));
        };

        let now = Utc::now();
        let job = Job {
            id: JobId::new(),
            priority: new.priority.unwrap_or(wt.priority),
            work_type: new.work_type,
            subject: new.subject,
            payload: new.payload,
            status: JobStatus::Pending,
            retries: 0,
            max_retries: new.max_retries.unwrap_or(self.config.max_retries),
            last_error: None,
            created_at: now,
            available_at: new.available_at.unwrap_or(now),
            updated_at: now,
        };
        self.db.insert_job(&job).await?;

        info!(job_id = %job.id, work_type = %job.work_type, subject = %job.subject, "job enqueued");
        self.executor.bus().emit(
            EventType::JobEnqueued,
            "queue",
            serde_json::json!({
                "job_id": job.id.to_string(),
                "work_type": job.work_type,
                "subject": job.subject,
                "priority": job.priority,
                "available_at": job.available_at,
            }),
        );
        self.wake.notify_one();
        Ok(job)
    }

    pub async fn get(&self, id: JobId) -> Result<Job> {
        self.db.get_job(id).await
    }

    /// Jobs waiting to run, in dispatch order.
    pub async fn pending(&self) -> Result<Vec<Job>> {
        self.db.pending_jobs().await
    }

    /// Most recent dispatches first, at most `limit` (and never more than
    /// the configured history size).
    pub async fn history(&self, limit: usize) -> Result<Vec<JobRun>> {
        self.db
            .recent_runs(limit.min(self.config.history_limit))
            .await
    }

    /// Settle jobs a crash left `running` as failed attempts: each is
    /// retried with backoff, or fails terminally once out of retries.
    pub async fn recover(&self) -> Result<u64> {
        let stranded = self.db.running_jobs().await?;
        for job in &stranded {
            warn!(job_id = %job.id, work_type = %job.work_type, attempt = job.attempt(), "recovering interrupted job");
            self.settle(job, job.updated_at, Err(INTERRUPTED.to_string()))
                .await?;
        }
        if !stranded.is_empty() {
            warn!(recovered = stranded.len(), "settled interrupted jobs");
        }
        Ok(stranded.len() as u64)
    }

    /// Claim the next dispatchable job: due, highest priority, oldest, and
    /// whose work item isn't already running.
    pub async fn dequeue(&self, now: DateTime<Utc>) -> Result<Option<ClaimedJob>> {
        for mut job in self.db.due_jobs(now).await? {
            if self.pool.available() == 0 {
                return Ok(None);
            }
            let item = job.item();
            let Some(claim) = self.pool.try_claim(&item) else {
                continue;
            };
            if self.db.claim_job(job.id, now).await? {
                job.status = JobStatus::Running;
                metrics::queue_operations().add(
                    1,
                    &[
                        KeyValue::new("work_type", job.work_type.clone()),
                        KeyValue::new("operation", "dispatch"),
                    ],
                );
                return Ok(Some(ClaimedJob { job, claim }));
            }
        }
        Ok(None)
    }

    /// Dispatch every job that can run now. Returns the number dispatched.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut dispatched = 0;
        while !self.shutdown.is_cancelled() {
            let Some(claimed) = self.dequeue(now).await? else {
                break;
            };
            let queue = self.clone();
            self.pool.spawn(async move {
                queue.run_job(claimed).await;
            });
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Execute one claimed job and settle it: completed, retried, or failed.
    pub async fn run_job(&self, claimed: ClaimedJob) {
        let ClaimedJob { job, claim } = claimed;
        let span = start_job_span(&job.id, &job.work_type, job.attempt());

        async {
            let started_at = Utc::now();
            let item = job.item();

            let result = match self.registry.get(&job.work_type) {
                None => Err(Error::UnknownWorkType(job.work_type.clone()).to_string()),
                Some(wt) => {
                    let missing = self.executor.tracker().missing_dependencies(wt, &job.subject);
                    if !missing.is_empty() {
                        Err(Error::DependenciesNotMet {
                            work_type: job.work_type.clone(),
                            missing,
                        }
                        .to_string())
                    } else {
                        self.executor.bus().emit(
                            EventType::JobStarted,
                            "queue",
                            serde_json::json!({
                                "job_id": job.id.to_string(),
                                "work_type": job.work_type,
                                "subject": job.subject,
                                "attempt": job.attempt(),
                            }),
                        );
                        let outcome = self
                            .executor
                            .execute(
                                wt,
                                &item,
                                Dispatch::manual(job.id, job.attempt()),
                                job.payload.clone(),
                            )
                            .await;
                        if outcome.discarded {
                            // Left `running`; settled as interrupted on next start.
                            return;
                        }
                        outcome.error.map_or(Ok(()), Err)
                    }
                }
            };
            drop(claim);

            let succeeded = result.is_ok();
            self.settle_with_retry(&job, started_at, result).await;
            if succeeded {
                if let Some(scheduler) = &self.scheduler {
                    scheduler.trigger();
                }
            }
            self.wake.notify_one();
        }
        .instrument(span)
        .await
    }

    /// Settle, retrying transient store errors. A job that still can't be
    /// settled is reported failed on the bus; its row keeps whatever state
    /// the store last accepted.
    async fn settle_with_retry(
        &self,
        job: &Job,
        started_at: DateTime<Utc>,
        result: std::result::Result<(), String>,
    ) {
        let mut delay = SETTLE_RETRY_DELAY;
        for attempt in 1..=SETTLE_ATTEMPTS {
            match self.settle(job, started_at, result.clone()).await {
                Ok(()) => return,
                Err(e) if attempt < SETTLE_ATTEMPTS => {
                    warn!(job_id = %job.id, attempt, error = %e, "failed to settle job, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    error!(job_id = %job.id, attempts = attempt, error = %e, "giving up settling job");
                    self.executor.bus().emit(
                        EventType::JobFailed,
                        "queue",
                        serde_json::json!({
                            "job_id": job.id.to_string(),
                            "work_type": job.work_type,
                            "subject": job.subject,
                            "attempts": job.attempt(),
                            "error": format!("could not record job outcome: {e}"),
                        }),
                    );
                }
            }
        }
    }

    /// Apply the state transition for one finished attempt, then record it
    /// in the dispatch history. Errors only if the transition wasn't stored.
    async fn settle(
        &self,
        job: &Job,
        started_at: DateTime<Utc>,
        result: std::result::Result<(), String>,
    ) -> Result<()> {
        let now = Utc::now();
        let duration_ms = (now - started_at).num_milliseconds().max(0) as u64;
        let mut run = JobRun {
            job_id: job.id,
            work_type: job.work_type.clone(),
            subject: job.subject.clone(),
            attempt: job.attempt(),
            status: RunStatus::Completed,
            error: None,
            started_at,
            finished_at: now,
            duration_ms,
        };
        let bus = self.executor.bus();

        let operation = match result {
            Ok(()) => {
                self.db.complete_job(job.id, now).await?;
                info!(job_id = %job.id, duration_ms, "job completed");
                bus.emit(
                    EventType::JobCompleted,
                    "queue",
                    serde_json::json!({
                        "job_id": job.id.to_string(),
                        "work_type": job.work_type,
                        "subject": job.subject,
                        "attempt": job.attempt(),
                        "duration_ms": duration_ms,
                    }),
                );
                "complete"
            }
            Err(error) if job.retries < job.max_retries => {
                let retries = job.retries + 1;
                let delay = retry_delay(retries, self.config.retry_base, self.config.retry_max);
                let available_at = now
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                self.db
                    .retry_job(job.id, retries, available_at, &error, now)
                    .await?;
                warn!(
                    job_id = %job.id,
                    retries,
                    max_retries = job.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "job failed, will retry"
                );
                bus.emit(
                    EventType::JobRetrying,
                    "queue",
                    serde_json::json!({
                        "job_id": job.id.to_string(),
                        "work_type": job.work_type,
                        "subject": job.subject,
                        "retries": retries,
                        "max_retries": job.max_retries,
                        "next_attempt_at": available_at,
                        "error": error,
                    }),
                );
                run.status = RunStatus::Retrying;
                run.error = Some(error);
                "retry"
            }
            Err(error) => {
                self.db.fail_job(job.id, &error, now).await?;
                error!(job_id = %job.id, attempts = job.attempt(), error = %error, "job failed terminally");
                bus.emit(
                    EventType::JobFailed,
                    "queue",
                    serde_json::json!({
                        "job_id": job.id.to_string(),
                        "work_type": job.work_type,
                        "subject": job.subject,
                        "attempts": job.attempt(),
                        "error": error,
                    }),
                );
                run.status = RunStatus::Failed;
                run.error = Some(error);
                "fail"
            }
        };

        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("work_type", job.work_type.clone()),
                KeyValue::new("operation", operation),
            ],
        );
        if let Err(e) = self.db.insert_run(&run, self.config.history_limit).await {
            warn!(job_id = %job.id, error = %e, "failed to record job history");
        }
        Ok(())
    }

    /// Run the sweep loop until shutdown.
    pub async fn run(&self) {
        info!(
            sweep_interval_ms = self.config.sweep_interval.as_millis() as u64,
            "job queue started"
        );

        loop {
            match self.sweep(Utc::now()).await {
                Ok(0) => {}
                Ok(dispatched) => debug!(dispatched, "sweep dispatched jobs"),
                Err(e) => error!("job sweep error: {e}"),
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("job queue shutting down");
                    return;
                }
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.config.sweep_interval) => {}
            }
        }
    }
}
