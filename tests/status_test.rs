//! Integration tests for the work type status snapshot.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use portfolio_work::completion::CompletionTracker;
use portfolio_work::model::work::{MarketTiming, Priority, WorkItem, WorkType};
use portfolio_work::registry::Registry;
use portfolio_work::status::snapshot;

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register_all(vec![
            WorkType::new("rebalance", |_ctx| async { Ok(()) }).priority(Priority::Low),
            WorkType::new("sync:portfolio", |_ctx| async { Ok(()) })
                .priority(Priority::Critical)
                .interval(Duration::from_secs(300)),
            WorkType::new("sync:prices", |_ctx| async { Ok(()) })
                .priority(Priority::High)
                .market_timing(MarketTiming::DuringMarketOpen)
                .interval(Duration::from_secs(60))
                .depends_on(["sync:portfolio"]),
        ])
        .unwrap();
    registry
}

#[tokio::test]
async fn snapshot_lists_every_type_in_priority_order() {
    let rows = snapshot(&registry(), &CompletionTracker::new());
    let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["sync:portfolio", "sync:prices", "rebalance"]);

    let prices = &rows[1];
    assert_eq!(prices.priority, Priority::High);
    assert_eq!(prices.market_timing, MarketTiming::DuringMarketOpen);
    assert_eq!(prices.interval, "1m0s");
    assert_eq!(prices.depends_on, vec!["sync:portfolio"]);
    assert!(prices.last_run.is_none());
    assert!(prices.next_run.is_none());
}

#[tokio::test]
async fn next_run_is_last_run_plus_interval() {
    let tracker = CompletionTracker::new();
    let t = Utc.with_ymd_and_hms(2026, 10, 16, 14, 0, 0).unwrap();
    tracker
        .mark_completed_at(&WorkItem::new("sync:prices", "A"), t)
        .await
        .unwrap();
    tracker
        .mark_completed_at(
            &WorkItem::new("sync:prices", "B"),
            t + chrono::Duration::seconds(10),
        )
        .await
        .unwrap();
    tracker
        .mark_completed_at(&WorkItem::global("rebalance"), t)
        .await
        .unwrap();

    let rows = snapshot(&registry(), &tracker);
    let prices = rows.iter().find(|r| r.id == "sync:prices").unwrap();
    assert_eq!(prices.last_run, Some(t + chrono::Duration::seconds(10)));
    assert_eq!(prices.next_run, Some(t + chrono::Duration::seconds(70)));

    let rebalance = rows.iter().find(|r| r.id == "rebalance").unwrap();
    assert_eq!(rebalance.interval, "0");
    assert_eq!(rebalance.last_run, Some(t));
    assert!(rebalance.next_run.is_none(), "on-demand types have no next run");
}

#[tokio::test]
async fn snapshot_serializes_for_the_api() {
    let rows = snapshot(&registry(), &CompletionTracker::new());
    let json = serde_json::to_value(&rows).unwrap();
    assert_eq!(json[0]["id"], "sync:portfolio");
    assert_eq!(json[0]["priority"], "critical");
    assert_eq!(json[0]["market_timing"], "any_time");
    assert_eq!(json[0]["interval"], "5m0s");
    assert!(json[0]["last_run"].is_null());
}
