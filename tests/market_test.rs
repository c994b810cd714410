//! Integration tests for the exchange calendar and the market-timing gate.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use portfolio_work::error::Error;
use portfolio_work::market::{CalendarMarketHours, MarketHours, MarketTimingGate};
use portfolio_work::model::work::MarketTiming;

const CALENDAR: &str = r#"
[exchanges.XNYS]
name = "New York Stock Exchange"
utc_offset_minutes = -300
open = "09:30"
close = "16:00"
holidays = ["2026-12-25"]
early_closes = { "2026-12-24" = "13:00" }

[exchanges.XHKG]
utc_offset_minutes = 480
open = "09:30"
close = "16:00"
lunch_break = { start = "12:00", end = "13:00" }

[subjects]
US0378331005 = "XNYS"
HK0000069689 = "XHKG"
"#;

const APPLE: &str = "US0378331005";
const AIA: &str = "HK0000069689";

fn utc(date: &str, time: &str) -> DateTime<Utc> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .unwrap()
        .and_time(chrono::NaiveTime::parse_from_str(time, "%H:%M").unwrap())
        .and_utc()
}

fn calendar() -> CalendarMarketHours {
    CalendarMarketHours::from_toml_str(CALENDAR).unwrap()
}

fn gate() -> MarketTimingGate {
    MarketTimingGate::new(Arc::new(calendar()))
}

// ---------------------------------------------------------------------------
// Calendar
// ---------------------------------------------------------------------------

#[test]
fn new_york_session_in_utc() {
    let hours = calendar();
    // Friday 2026-10-16; NYSE at UTC-5 trades 14:30-21:00 UTC.
    assert!(!hours.is_security_market_open(APPLE, utc("2026-10-16", "14:29")));
    assert!(hours.is_security_market_open(APPLE, utc("2026-10-16", "14:30")));
    assert!(hours.is_security_market_open(APPLE, utc("2026-10-16", "20:59")));
    assert!(!hours.is_security_market_open(APPLE, utc("2026-10-16", "21:00")));
}

#[test]
fn lunch_break_closes_the_market() {
    let hours = calendar();
    // HKEX at UTC+8: morning 01:30-04:00 UTC, lunch until 05:00.
    assert!(hours.is_security_market_open(AIA, utc("2026-10-16", "03:59")));
    assert!(!hours.is_security_market_open(AIA, utc("2026-10-16", "04:30")));
    assert!(hours.is_security_market_open(AIA, utc("2026-10-16", "05:00")));
}

#[test]
fn weekends_and_holidays_are_closed() {
    let hours = calendar();
    let saturday = utc("2026-10-17", "15:00");
    assert!(!hours.is_security_market_open(APPLE, saturday));
    assert!(!hours.is_trading_day(APPLE, saturday));

    let christmas = utc("2026-12-25", "15:00");
    assert!(!hours.is_security_market_open(APPLE, christmas));
    assert!(!hours.is_trading_day(APPLE, christmas));
    assert!(hours.is_trading_day(AIA, christmas), "holiday only applies to XNYS");
}

#[test]
fn early_close_shortens_the_session() {
    let hours = calendar();
    assert!(hours.is_security_market_open(APPLE, utc("2026-12-24", "17:59")));
    assert!(!hours.is_security_market_open(APPLE, utc("2026-12-24", "18:00")));
}

#[test]
fn any_and_all_markets() {
    let hours = calendar();
    let ny_open = utc("2026-10-16", "15:00");
    assert!(hours.is_any_market_open(ny_open));
    assert!(!hours.are_all_markets_closed(ny_open));

    // 23:30 UTC: New York closed for the day, Hong Kong not yet open.
    let quiet = utc("2026-10-16", "23:30");
    assert!(!hours.is_any_market_open(quiet));
    assert!(hours.are_all_markets_closed(quiet));
}

#[test]
fn unmapped_subject_falls_back_to_any_market() {
    let hours = calendar();
    assert!(hours.is_security_market_open("XS0000000000", utc("2026-10-16", "15:00")));
    assert!(!hours.is_security_market_open("XS0000000000", utc("2026-10-16", "23:30")));
}

#[test]
fn exchange_lookup_exposes_name() {
    let hours = calendar();
    assert_eq!(hours.exchange("XNYS").unwrap().name, "New York Stock Exchange");
    assert_eq!(hours.exchange("XHKG").unwrap().name, "XHKG");
    assert!(hours.exchange("XLON").is_none());
}

#[test]
fn invalid_calendars_are_config_errors() {
    let unknown_exchange = r#"
[subjects]
US0378331005 = "XNYS"
"#;
    let err = CalendarMarketHours::from_toml_str(unknown_exchange).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "got {err:?}");

    let inverted = r#"
[exchanges.XNYS]
open = "16:00"
close = "09:30"
"#;
    assert!(matches!(
        CalendarMarketHours::from_toml_str(inverted).unwrap_err(),
        Error::Config(_)
    ));

    let bad_weekday = r#"
[exchanges.XNYS]
open = "09:30"
close = "16:00"
weekdays = ["Funday"]
"#;
    assert!(CalendarMarketHours::from_toml_str(bad_weekday).is_err());
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

#[test]
fn during_market_open_uses_the_subjects_market() {
    let gate = gate();
    let ny_open = utc("2026-10-16", "15:00");
    assert!(gate.allows_timing(MarketTiming::DuringMarketOpen, APPLE, ny_open));
    assert!(!gate.allows_timing(MarketTiming::DuringMarketOpen, AIA, ny_open));
    // Subject-less work asks whether any market is open.
    assert!(gate.allows_timing(MarketTiming::DuringMarketOpen, "", ny_open));
}

#[test]
fn after_market_close_requires_a_trading_day() {
    let gate = gate();
    assert!(gate.allows_timing(MarketTiming::AfterMarketClose, APPLE, utc("2026-10-16", "22:00")));
    assert!(!gate.allows_timing(MarketTiming::AfterMarketClose, APPLE, utc("2026-10-16", "15:00")));
    assert!(!gate.allows_timing(MarketTiming::AfterMarketClose, APPLE, utc("2026-10-17", "22:00")));
}

#[test]
fn after_market_close_is_not_before_the_open() {
    let gate = gate();
    // 06:00 in New York: closed, but today's session hasn't happened yet.
    assert!(!gate.allows_timing(MarketTiming::AfterMarketClose, APPLE, utc("2026-10-16", "11:00")));
    assert!(!gate.allows_timing(MarketTiming::AfterMarketClose, APPLE, utc("2026-10-16", "14:29")));
    assert!(gate.allows_timing(MarketTiming::AfterMarketClose, APPLE, utc("2026-10-16", "21:00")));
}

#[test]
fn after_market_close_honours_early_closes() {
    let gate = gate();
    // Christmas Eve closes at 13:00 New York, 18:00 UTC.
    assert!(!gate.allows_timing(MarketTiming::AfterMarketClose, APPLE, utc("2026-12-24", "17:30")));
    assert!(gate.allows_timing(MarketTiming::AfterMarketClose, APPLE, utc("2026-12-24", "18:30")));
}

#[test]
fn subject_less_after_market_close_waits_for_every_session_today() {
    let hours = calendar();
    // Friday 10:00 UTC: Hong Kong has closed, New York hasn't opened.
    assert!(!hours.has_closed_today("", utc("2026-10-16", "10:00")));
    // Friday 22:00 UTC: New York has closed; it's already Saturday in Hong Kong.
    assert!(hours.has_closed_today("", utc("2026-10-16", "22:00")));
    // No exchange trades on Sunday.
    assert!(!hours.has_closed_today("", utc("2026-10-18", "22:00")));
    // Unmapped subjects follow the same rule.
    assert!(!hours.has_closed_today("XS0000000000", utc("2026-10-16", "10:00")));
}

#[test]
fn all_markets_closed_ignores_subject() {
    let gate = gate();
    assert!(gate.allows_timing(MarketTiming::AllMarketsClosed, APPLE, utc("2026-10-16", "23:30")));
    assert!(!gate.allows_timing(MarketTiming::AllMarketsClosed, AIA, utc("2026-10-16", "15:00")));
}

#[test]
fn gate_without_market_data_only_allows_any_time() {
    let gate = MarketTimingGate::unavailable();
    let now = utc("2026-10-16", "15:00");
    assert!(gate.allows_timing(MarketTiming::AnyTime, APPLE, now));
    assert!(!gate.allows_timing(MarketTiming::DuringMarketOpen, APPLE, now));
    assert!(!gate.allows_timing(MarketTiming::AfterMarketClose, APPLE, now));
    assert!(!gate.allows_timing(MarketTiming::AllMarketsClosed, APPLE, now));
}

struct AlwaysOpen;

impl MarketHours for AlwaysOpen {
    fn is_any_market_open(&self, _now: DateTime<Utc>) -> bool {
        true
    }

    fn is_security_market_open(&self, _subject: &str, _now: DateTime<Utc>) -> bool {
        true
    }

    fn are_all_markets_closed(&self, _now: DateTime<Utc>) -> bool {
        false
    }

    fn has_closed_today(&self, _subject: &str, _now: DateTime<Utc>) -> bool {
        false
    }
}

#[test]
fn gate_accepts_any_market_hours_source() {
    let gate = MarketTimingGate::new(Arc::new(AlwaysOpen));
    let now = Utc::now();
    assert!(gate.allows_timing(MarketTiming::DuringMarketOpen, APPLE, now));
    assert!(!gate.allows_timing(MarketTiming::AfterMarketClose, APPLE, now));
    assert!(!gate.allows_timing(MarketTiming::AllMarketsClosed, "", now));
}
