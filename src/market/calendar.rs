//! Exchange calendar loaded from TOML.
//!
//! ```toml
//! [exchanges.XNYS]
//! name = "New York Stock Exchange"
//! utc_offset_minutes = -300
//! open = "09:30"
//! close = "16:00"
//! holidays = ["2026-12-25"]
//! early_closes = { "2026-12-24" = "13:00" }
//!
//! [exchanges.XHKG]
//! utc_offset_minutes = 480
//! open = "09:30"
//! close = "16:00"
//! lunch_break = { start = "12:00", end = "13:00" }
//!
//! [subjects]
//! US0378331005 = "XNYS"
//! ```
//!
//! Trading windows are local to each exchange's fixed UTC offset.
//! `weekdays` defaults to Monday through Friday.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};
use serde::Deserialize;

use super::MarketHours;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct CalendarFile {
    #[serde(default)]
    exchanges: HashMap<String, ExchangeFile>,
    #[serde(default)]
    subjects: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ExchangeFile {
    name: Option<String>,
    #[serde(default)]
    utc_offset_minutes: i32,
    open: String,
    close: String,
    lunch_break: Option<BreakFile>,
    weekdays: Option<Vec<String>>,
    #[serde(default)]
    holidays: Vec<String>,
    #[serde(default)]
    early_closes: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct BreakFile {
    start: String,
    end: String,
}

/// One exchange's trading schedule.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub code: String,
    pub name: String,
    offset: FixedOffset,
    open: NaiveTime,
    close: NaiveTime,
    lunch_break: Option<(NaiveTime, NaiveTime)>,
    weekdays: HashSet<Weekday>,
    holidays: HashSet<NaiveDate>,
    early_closes: HashMap<NaiveDate, NaiveTime>,
}

impl Exchange {
    fn local(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.offset)
    }

    pub fn is_trading_day(&self, now: DateTime<Utc>) -> bool {
        let local = self.local(now);
        self.weekdays.contains(&local.weekday()) && !self.holidays.contains(&local.date_naive())
    }

    /// Close on the local date of `now`, early closes included.
    fn close_on(&self, local: DateTime<FixedOffset>) -> NaiveTime {
        self.early_closes
            .get(&local.date_naive())
            .copied()
            .unwrap_or(self.close)
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        if !self.is_trading_day(now) {
            return false;
        }
        let local = self.local(now);
        let time = local.time();
        if time < self.open || time >= self.close_on(local) {
            return false;
        }
        match self.lunch_break {
            Some((start, end)) => !(time >= start && time < end),
            None => true,
        }
    }

    /// Trading day, and past the day's close.
    pub fn has_closed(&self, now: DateTime<Utc>) -> bool {
        let local = self.local(now);
        self.is_trading_day(now) && local.time() >= self.close_on(local)
    }
}

/// [`MarketHours`] backed by a static exchange calendar.
#[derive(Debug, Clone, Default)]
pub struct CalendarMarketHours {
    exchanges: HashMap<String, Exchange>,
    /// Subject → exchange code.
    subjects: HashMap<String, String>,
}

impl CalendarMarketHours {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read market calendar {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: CalendarFile = toml::from_str(content)?;

        let mut exchanges = HashMap::new();
        for (code, raw) in file.exchanges {
            let exchange = parse_exchange(&code, raw)?;
            exchanges.insert(code, exchange);
        }

        for (subject, code) in &file.subjects {
            if !exchanges.contains_key(code) {
                return Err(Error::Config(format!(
                    "subject {subject} mapped to unknown exchange {code}"
                )));
            }
        }

        Ok(Self {
            exchanges,
            subjects: file.subjects,
        })
    }

    pub fn exchange(&self, code: &str) -> Option<&Exchange> {
        self.exchanges.get(code)
    }

    fn exchange_for(&self, subject: &str) -> Option<&Exchange> {
        self.subjects
            .get(subject)
            .and_then(|code| self.exchanges.get(code))
    }

    /// Whether `now` falls on a trading day for `subject`'s exchange, or
    /// for any exchange when the subject is unmapped.
    pub fn is_trading_day(&self, subject: &str, now: DateTime<Utc>) -> bool {
        match self.exchange_for(subject) {
            Some(exchange) => exchange.is_trading_day(now),
            None => self.exchanges.values().any(|e| e.is_trading_day(now)),
        }
    }
}

impl MarketHours for CalendarMarketHours {
    fn is_any_market_open(&self, now: DateTime<Utc>) -> bool {
        self.exchanges.values().any(|e| e.is_open(now))
    }

    fn is_security_market_open(&self, subject: &str, now: DateTime<Utc>) -> bool {
        match self.exchange_for(subject) {
            Some(exchange) => exchange.is_open(now),
            None => self.is_any_market_open(now),
        }
    }

    fn are_all_markets_closed(&self, now: DateTime<Utc>) -> bool {
        !self.is_any_market_open(now)
    }

    fn has_closed_today(&self, subject: &str, now: DateTime<Utc>) -> bool {
        match self.exchange_for(subject) {
            Some(exchange) => exchange.has_closed(now),
            None => {
                let mut trading = self
                    .exchanges
                    .values()
                    .filter(|e| e.is_trading_day(now))
                    .peekable();
                trading.peek().is_some() && trading.all(|e| e.has_closed(now))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn parse_exchange(code: &str, raw: ExchangeFile) -> Result<Exchange> {
    let offset = FixedOffset::east_opt(raw.utc_offset_minutes * 60).ok_or_else(|| {
        Error::Config(format!(
            "exchange {code}: utc_offset_minutes out of range: {}",
            raw.utc_offset_minutes
        ))
    })?;

    let open = parse_time(code, &raw.open)?;
    let close = parse_time(code, &raw.close)?;
    if open >= close {
        return Err(Error::Config(format!(
            "exchange {code}: open {} is not before close {}",
            raw.open, raw.close
        )));
    }

    let lunch_break = raw
        .lunch_break
        .map(|b| Ok::<_, Error>((parse_time(code, &b.start)?, parse_time(code, &b.end)?)))
        .transpose()?;

    let weekdays = match raw.weekdays {
        Some(days) => days
            .iter()
            .map(|d| {
                d.parse::<Weekday>()
                    .map_err(|_| Error::Config(format!("exchange {code}: invalid weekday {d}")))
            })
            .collect::<Result<HashSet<_>>>()?,
        None => [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
        ]
        .into_iter()
        .collect(),
    };

    let holidays = raw
        .holidays
        .iter()
        .map(|d| parse_date(code, d))
        .collect::<Result<HashSet<_>>>()?;

    let early_closes = raw
        .early_closes
        .iter()
        .map(|(d, t)| Ok((parse_date(code, d)?, parse_time(code, t)?)))
        .collect::<Result<HashMap<_, _>>>()?;

    Ok(Exchange {
        code: code.to_string(),
        name: raw.name.unwrap_or_else(|| code.to_string()),
        offset,
        open,
        close,
        lunch_break,
        weekdays,
        holidays,
        early_closes,
    })
}

fn parse_time(code: &str, s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|e| Error::Config(format!("exchange {code}: invalid time {s}: {e}")))
}

fn parse_date(code: &str, s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::Config(format!("exchange {code}: invalid date {s}: {e}")))
}
