//! Work types and work items.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::progress::ProgressReporter;

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Scheduling priority. Lower values run first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical = 0,
    High = 1,
    #[default]
    Medium = 2,
    Low = 3,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn rank(self) -> i64 {
        self as i64
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            0 => Some(Priority::Critical),
            1 => Some(Priority::High),
            2 => Some(Priority::Medium),
            3 => Some(Priority::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(Error::Other(format!("invalid priority: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Market timing
// ---------------------------------------------------------------------------

/// The market window during which a work type may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketTiming {
    #[default]
    AnyTime,
    DuringMarketOpen,
    AfterMarketClose,
    AllMarketsClosed,
}

impl MarketTiming {
    pub fn as_str(self) -> &'static str {
        match self {
            MarketTiming::AnyTime => "any_time",
            MarketTiming::DuringMarketOpen => "during_market_open",
            MarketTiming::AfterMarketClose => "after_market_close",
            MarketTiming::AllMarketsClosed => "all_markets_closed",
        }
    }
}

impl fmt::Display for MarketTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Work item
// ---------------------------------------------------------------------------

/// One schedulable unit: a work type applied to a subject.
///
/// The empty subject is the sentinel for subject-less work types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    pub work_type: String,
    pub subject: String,
}

impl WorkItem {
    pub fn new(work_type: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            work_type: work_type.into(),
            subject: subject.into(),
        }
    }

    /// A subject-less item.
    pub fn global(work_type: impl Into<String>) -> Self {
        Self::new(work_type, "")
    }

    /// Identity string: `type:subject`, or just `type` for the sentinel subject.
    pub fn id(&self) -> String {
        if self.subject.is_empty() {
            self.work_type.clone()
        } else {
            format!("{}:{}", self.work_type, self.subject)
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.subject.is_empty() {
            write!(f, "{}", self.work_type)
        } else {
            write!(f, "{}:{}", self.work_type, self.subject)
        }
    }
}

// ---------------------------------------------------------------------------
// Work type
// ---------------------------------------------------------------------------

/// Everything a task body receives when it runs.
pub struct WorkContext {
    pub subject: String,
    /// Cancelled on timeout or shutdown. Bodies should observe it at I/O points.
    pub cancel: CancellationToken,
    pub progress: ProgressReporter,
    /// Caller-supplied parameters of a manual job. Empty for scheduled runs.
    pub payload: serde_json::Map<String, serde_json::Value>,
}

pub type ExecuteFn =
    Arc<dyn Fn(WorkContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
pub type SubjectsFn = Arc<dyn Fn() -> Vec<String> + Send + Sync>;

/// A registered task definition: what to run, when it may run, how often.
#[derive(Clone)]
pub struct WorkType {
    pub id: String,
    pub description: String,
    pub priority: Priority,
    pub market_timing: MarketTiming,
    /// Minimum time between completions per subject. Zero = on-demand only.
    pub interval: Duration,
    pub depends_on: Vec<String>,
    find_subjects: SubjectsFn,
    execute: ExecuteFn,
}

impl WorkType {
    pub fn new<F, Fut>(id: impl Into<String>, execute: F) -> Self
    where
        F: Fn(WorkContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = id.into();
        Self {
            description: id.clone(),
            id,
            priority: Priority::default(),
            market_timing: MarketTiming::default(),
            interval: Duration::ZERO,
            depends_on: Vec::new(),
            find_subjects: Arc::new(|| vec![String::new()]),
            execute: Arc::new(move |ctx| execute(ctx).boxed()),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn market_timing(mut self, timing: MarketTiming) -> Self {
        self.market_timing = timing;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn subjects<F>(mut self, find: F) -> Self
    where
        F: Fn() -> Vec<String> + Send + Sync + 'static,
    {
        self.find_subjects = Arc::new(find);
        self
    }

    pub fn is_on_demand(&self) -> bool {
        self.interval.is_zero()
    }

    pub fn find_subjects(&self) -> Vec<String> {
        (self.find_subjects)()
    }

    pub fn execute(&self, ctx: WorkContext) -> BoxFuture<'static, anyhow::Result<()>> {
        (self.execute)(ctx)
    }
}

impl fmt::Debug for WorkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkType")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("market_timing", &self.market_timing)
            .field("interval", &self.interval)
            .field("depends_on", &self.depends_on)
            .finish_non_exhaustive()
    }
}

/// Render an interval the way operators read it: `"0"`, `"30s"`, `"5m0s"`, `"1h0m0s"`.
pub fn format_interval(interval: Duration) -> String {
    if interval.is_zero() {
        return "0".to_string();
    }
    let total = interval.as_secs();
    let millis = interval.subsec_millis();
    if total == 0 {
        return format!("{millis}ms");
    }
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    let secs = if millis > 0 {
        format!("{seconds}.{millis:03}s")
    } else {
        format!("{seconds}s")
    };
    if hours > 0 {
        format!("{hours}h{minutes}m{secs}")
    } else if minutes > 0 {
        format!("{minutes}m{secs}")
    } else {
        secs
    }
}
