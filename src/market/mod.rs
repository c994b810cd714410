//! Market timing gate.
//!
//! Work types declare when they may run relative to exchange trading
//! hours. The gate answers that question using a [`MarketHours`]
//! collaborator; without one, only `AnyTime` work is allowed.

pub mod calendar;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::model::work::{MarketTiming, WorkType};

pub use calendar::CalendarMarketHours;

/// Market-data collaborator: which markets are trading at a given instant.
pub trait MarketHours: Send + Sync {
    fn is_any_market_open(&self, now: DateTime<Utc>) -> bool;

    /// Whether the market `subject` trades on is open. Subjects with no
    /// known market fall back to [`is_any_market_open`](Self::is_any_market_open).
    fn is_security_market_open(&self, subject: &str, now: DateTime<Utc>) -> bool;

    fn are_all_markets_closed(&self, now: DateTime<Utc>) -> bool;

    /// Whether today's session for `subject`'s market has already closed:
    /// `now` is on a trading day and past that day's close. Before the open
    /// and on non-trading days this is false. An empty or unmapped subject
    /// asks the same of every market trading today.
    fn has_closed_today(&self, subject: &str, now: DateTime<Utc>) -> bool;
}

#[derive(Clone)]
pub struct MarketTimingGate {
    hours: Option<Arc<dyn MarketHours>>,
}

impl MarketTimingGate {
    pub fn new(hours: Arc<dyn MarketHours>) -> Self {
        Self { hours: Some(hours) }
    }

    /// A gate with no market data: anything that depends on it is ineligible.
    pub fn unavailable() -> Self {
        Self { hours: None }
    }

    pub fn allows(&self, work_type: &WorkType, subject: &str, now: DateTime<Utc>) -> bool {
        self.allows_timing(work_type.market_timing, subject, now)
    }

    pub fn allows_timing(&self, timing: MarketTiming, subject: &str, now: DateTime<Utc>) -> bool {
        if timing == MarketTiming::AnyTime {
            return true;
        }
        let Some(hours) = &self.hours else {
            return false;
        };
        let relevant_open = || {
            if subject.is_empty() {
                hours.is_any_market_open(now)
            } else {
                hours.is_security_market_open(subject, now)
            }
        };
        match timing {
            MarketTiming::AnyTime => true,
            MarketTiming::DuringMarketOpen => relevant_open(),
            MarketTiming::AfterMarketClose => hours.has_closed_today(subject, now),
            MarketTiming::AllMarketsClosed => hours.are_all_markets_closed(now),
        }
    }
}

impl std::fmt::Debug for MarketTimingGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketTimingGate")
            .field("available", &self.hours.is_some())
            .finish()
    }
}
