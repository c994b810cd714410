//! Status snapshot of every registered work type.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::completion::CompletionTracker;
use crate::model::work::{MarketTiming, Priority, format_interval};
use crate::registry::Registry;

/// One row of the status report.
#[derive(Debug, Clone, Serialize)]
pub struct WorkTypeStatus {
    pub id: String,
    pub priority: Priority,
    pub market_timing: MarketTiming,
    /// `"0"` for on-demand types, otherwise e.g. `"5m0s"`.
    pub interval: String,
    pub depends_on: Vec<String>,
    /// Most recent completion across all subjects.
    pub last_run: Option<DateTime<Utc>>,
    /// `last_run + interval`; `None` for on-demand types or when never run.
    pub next_run: Option<DateTime<Utc>>,
}

/// Status of every work type, in registry order.
pub fn snapshot(registry: &Registry, tracker: &CompletionTracker) -> Vec<WorkTypeStatus> {
    registry
        .all()
        .into_iter()
        .map(|wt| {
            let last_run = tracker.last_completion_for_type(&wt.id);
            let next_run = if wt.is_on_demand() {
                None
            } else {
                last_run.and_then(|last| {
                    chrono::Duration::from_std(wt.interval)
                        .ok()
                        .and_then(|interval| last.checked_add_signed(interval))
                })
            };
            WorkTypeStatus {
                id: wt.id.clone(),
                priority: wt.priority,
                market_timing: wt.market_timing,
                interval: format_interval(wt.interval),
                depends_on: wt.depends_on.clone(),
                last_run,
                next_run,
            }
        })
        .collect()
}
