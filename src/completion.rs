//! Completion tracker: last successful completion per work item.
//!
//! Answers "is this item due?" for the scheduler and "has the dependency
//! run since I last did?" for eligibility. Reads and writes go to a sharded
//! in-memory map; when backed by a [`Db`] every write is persisted too.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info};

use crate::db::Db;
use crate::error::Result;
use crate::model::work::{WorkItem, WorkType};

#[derive(Default)]
pub struct CompletionTracker {
    records: DashMap<WorkItem, DateTime<Utc>>,
    db: Option<Db>,
}

impl CompletionTracker {
    /// Purely in-memory tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker backed by `db`, with existing records restored.
    pub async fn load(db: Db) -> Result<Self> {
        let records = DashMap::new();
        for (item, at) in db.load_completions().await? {
            records.insert(item, at);
        }
        info!(records = records.len(), "restored completion records");
        Ok(Self {
            records,
            db: Some(db),
        })
    }

    /// Record a successful completion. Idempotent; an earlier timestamp
    /// never replaces a later one.
    pub async fn mark_completed_at(&self, item: &WorkItem, at: DateTime<Utc>) -> Result<()> {
        self.records
            .entry(item.clone())
            .and_modify(|existing| {
                if at > *existing {
                    *existing = at;
                }
            })
            .or_insert(at);
        debug!(item = %item, at = %at, "completion recorded");

        if let Some(db) = &self.db {
            db.upsert_completion(item, at).await?;
        }
        Ok(())
    }

    pub fn last_completion(&self, item: &WorkItem) -> Option<DateTime<Utc>> {
        self.records.get(item).map(|r| *r)
    }

    /// Most recent completion of `work_type` across all of its subjects.
    pub fn last_completion_for_type(&self, work_type: &str) -> Option<DateTime<Utc>> {
        self.records
            .iter()
            .filter(|r| r.key().work_type == work_type)
            .map(|r| *r.value())
            .max()
    }

    /// Whether `subject` of `work_type` should run again at `now`.
    ///
    /// On-demand types (zero interval) are never due.
    pub fn is_due(&self, work_type: &WorkType, subject: &str, now: DateTime<Utc>) -> bool {
        if work_type.is_on_demand() {
            return false;
        }
        match self.last_completion(&WorkItem::new(&work_type.id, subject)) {
            None => true,
            Some(last) => match chrono::Duration::from_std(work_type.interval) {
                Ok(interval) => now - last >= interval,
                // Intervals too large for chrono never come due again.
                Err(_) => false,
            },
        }
    }

    /// Completion of `dependency` relevant to `subject`: the same subject,
    /// falling back to the dependency's subject-less record.
    pub fn dependency_completion(&self, dependency: &str, subject: &str) -> Option<DateTime<Utc>> {
        self.last_completion(&WorkItem::new(dependency, subject))
            .or_else(|| {
                if subject.is_empty() {
                    None
                } else {
                    self.last_completion(&WorkItem::global(dependency))
                }
            })
    }

    /// Dependencies of `work_type` that block `subject` from running.
    ///
    /// A dependency blocks unless it has completed more recently than the
    /// candidate itself (or at all, if the candidate never completed).
    pub fn unmet_dependencies(&self, work_type: &WorkType, subject: &str) -> Vec<String> {
        let own = self.last_completion(&WorkItem::new(&work_type.id, subject));
        work_type
            .depends_on
            .iter()
            .filter(|dep| match self.dependency_completion(dep, subject) {
                None => true,
                Some(dep_at) => own.is_some_and(|own_at| dep_at <= own_at),
            })
            .cloned()
            .collect()
    }

    /// Dependencies of `work_type` that have never completed for `subject`.
    pub fn missing_dependencies(&self, work_type: &WorkType, subject: &str) -> Vec<String> {
        work_type
            .depends_on
            .iter()
            .filter(|dep| self.dependency_completion(dep, subject).is_none())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
