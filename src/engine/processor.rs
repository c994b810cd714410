//! Scheduler/processor: selects eligible work and dispatches it to the pool.
//!
//! One loop task drives selection. It wakes on an explicit trigger, when any
//! dispatched execution finishes, and on a periodic tick. An item whose
//! scheduled run failed sits out one poll interval before it is selected
//! again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::executor::{Dispatch, Executor};
use super::pool::{Claim, WorkerPool};
use crate::completion::CompletionTracker;
use crate::market::MarketTimingGate;
use crate::model::work::{WorkItem, WorkType};
use crate::registry::Registry;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// The scheduling loop. Cheap to clone; clones drive the same loop state.
#[derive(Clone)]
pub struct Processor {
    registry: Arc<Registry>,
    tracker: Arc<CompletionTracker>,
    gate: MarketTimingGate,
    pool: WorkerPool,
    executor: Executor,
    poll_interval: Duration,
    /// Last failure time of items whose most recent scheduled run failed.
    failures: Arc<DashMap<WorkItem, DateTime<Utc>>>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
}

impl Processor {
    pub fn new(
        registry: Arc<Registry>,
        gate: MarketTimingGate,
        pool: WorkerPool,
        executor: Executor,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            tracker: Arc::clone(executor.tracker()),
            gate,
            pool,
            executor,
            poll_interval,
            failures: Arc::new(DashMap::new()),
            wake: Arc::new(Notify::new()),
            shutdown,
        }
    }

    /// Ask for a pass as soon as possible.
    pub fn trigger(&self) {
        self.wake.notify_one();
    }

    /// Work items eligible to run at `now`, in dispatch order.
    ///
    /// Eligible means: due by interval, not cooling down after a failure,
    /// allowed by market timing, and every dependency has completed since
    /// this item last did.
    pub fn select_eligible(&self, now: DateTime<Utc>) -> Vec<WorkItem> {
        let mut eligible = Vec::new();
        for wt in self.registry.all() {
            if wt.is_on_demand() {
                continue;
            }
            for subject in wt.find_subjects() {
                if !self.tracker.is_due(wt, &subject, now) {
                    continue;
                }
                if let Some(failed_at) = self.cooling_down(&wt.id, &subject, now) {
                    debug!(work_type = %wt.id, subject = %subject, %failed_at, "cooling down after failure");
                    continue;
                }
                if !self.gate.allows(wt, &subject, now) {
                    debug!(work_type = %wt.id, subject = %subject, timing = %wt.market_timing, "outside market window");
                    continue;
                }
                let unmet = self.tracker.unmet_dependencies(wt, &subject);
                if !unmet.is_empty() {
                    debug!(work_type = %wt.id, subject = %subject, ?unmet, "waiting on dependencies");
                    continue;
                }
                eligible.push(WorkItem::new(&wt.id, subject));
            }
        }
        eligible
    }

    /// When the item last failed, if that was less than a poll interval
    /// before `now`.
    fn cooling_down(&self, work_type: &str, subject: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let failed_at = *self.failures.get(&WorkItem::new(work_type, subject))?;
        let cooldown = chrono::Duration::from_std(self.poll_interval).unwrap_or(chrono::Duration::MAX);
        match failed_at.checked_add_signed(cooldown) {
            Some(until) if now >= until => None,
            _ => Some(failed_at),
        }
    }

    /// Run one selection pass, dispatching as many eligible items as there
    /// are free workers. Returns the number dispatched.
    pub fn run_pass(&self, now: DateTime<Utc>) -> usize {
        if self.shutdown.is_cancelled() {
            return 0;
        }
        let mut dispatched = 0;
        for item in self.select_eligible(now) {
            if self.pool.available() == 0 {
                break;
            }
            let Some(wt) = self.registry.get(&item.work_type) else {
                continue;
            };
            let Some(claim) = self.pool.try_claim(&item) else {
                continue;
            };
            self.dispatch(wt.clone(), claim);
            dispatched += 1;
        }
        if dispatched > 0 {
            debug!(dispatched, "pass dispatched work");
        }
        dispatched
    }

    fn dispatch(&self, work_type: WorkType, claim: Claim) {
        let executor = self.executor.clone();
        let failures = Arc::clone(&self.failures);
        let wake = Arc::clone(&self.wake);
        self.pool.spawn(async move {
            let item = claim.item().clone();
            let outcome = executor
                .execute(&work_type, &item, Dispatch::scheduled(), serde_json::Map::new())
                .await;
            if outcome.discarded {
                return;
            }
            // Record before releasing the claim so no pass sees the item free
            // and uncooled.
            if outcome.is_success() {
                failures.remove(&item);
            } else {
                failures.insert(item, outcome.finished_at);
            }
            drop(claim);
            wake.notify_one();
        });
    }

    /// Run the loop until shutdown.
    pub async fn run(&self) {
        info!(
            work_types = self.registry.len(),
            poll_interval_secs = self.poll_interval.as_secs(),
            "processor started"
        );

        loop {
            self.run_pass(Utc::now());

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("processor shutting down");
                    return;
                }
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
