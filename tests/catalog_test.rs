//! Integration tests for the TOML work type catalog and command hooks.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use portfolio_work::bus::EventBus;
use portfolio_work::catalog;
use portfolio_work::error::Error;
use portfolio_work::event::EventType;
use portfolio_work::model::work::{MarketTiming, Priority, WorkContext};
use portfolio_work::progress::ProgressReporter;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn write_script(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

fn ctx(subject: &str) -> WorkContext {
    WorkContext {
        subject: subject.to_string(),
        cancel: CancellationToken::new(),
        progress: ProgressReporter::noop(),
        payload: serde_json::Map::new(),
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[test]
fn parse_full_entry() {
    let specs = catalog::parse(
        r#"
[[work]]
id = "sync:prices"
description = "Sync security prices"
priority = "high"
market_timing = "during_market_open"
interval_secs = 300
depends_on = ["sync:portfolio"]
subjects = ["US0378331005", "NL0010273215"]
command = "hooks/sync-prices.sh"
args = ["--fast"]
"#,
    )
    .unwrap();

    assert_eq!(specs.len(), 1);
    let spec = &specs[0];
    assert_eq!(spec.id, "sync:prices");
    assert_eq!(spec.priority, Priority::High);
    assert_eq!(spec.market_timing, MarketTiming::DuringMarketOpen);
    assert_eq!(spec.interval_secs, 300);
    assert_eq!(spec.depends_on, vec!["sync:portfolio"]);
    assert_eq!(spec.args, vec!["--fast"]);

    let wt = spec.clone().into_work_type(Path::new("/etc/work"));
    assert_eq!(wt.description, "Sync security prices");
    assert_eq!(wt.interval, Duration::from_secs(300));
    assert_eq!(wt.find_subjects(), vec!["US0378331005", "NL0010273215"]);
}

#[test]
fn defaults_make_an_on_demand_global_type() {
    let specs = catalog::parse(
        r#"
[[work]]
id = "rebalance"
command = "/usr/local/bin/rebalance"
"#,
    )
    .unwrap();
    let wt = specs[0].clone().into_work_type(Path::new("."));
    assert_eq!(wt.priority, Priority::Medium);
    assert_eq!(wt.market_timing, MarketTiming::AnyTime);
    assert!(wt.is_on_demand());
    assert_eq!(wt.description, "rebalance");
    assert_eq!(wt.find_subjects(), vec![""]);
}

#[test]
fn unknown_fields_are_rejected() {
    let err = catalog::parse(
        r#"
[[work]]
id = "rebalance"
command = "x"
intervall_secs = 5
"#,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Toml(_)));
}

// ---------------------------------------------------------------------------
// Directory loading
// ---------------------------------------------------------------------------

#[test]
fn load_registry_across_files() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("10-prices.toml"),
        r#"
[[work]]
id = "sync:prices"
interval_secs = 60
depends_on = ["sync:portfolio"]
command = "prices.sh"
"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("00-portfolio.toml"),
        r#"
[[work]]
id = "sync:portfolio"
priority = "critical"
interval_secs = 300
command = "portfolio.sh"
"#,
    )
    .unwrap();
    std::fs::write(dir.path().join("README.md"), "not a catalog file").unwrap();

    let registry = catalog::load_registry(dir.path()).unwrap();
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.all()[0].id, "sync:portfolio");
    assert_eq!(
        registry.get("sync:prices").unwrap().depends_on,
        vec!["sync:portfolio"]
    );
}

#[test]
fn load_registry_reports_dependency_errors() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("work.toml"),
        r#"
[[work]]
id = "a"
depends_on = ["b"]
command = "a.sh"

[[work]]
id = "b"
depends_on = ["a"]
command = "b.sh"
"#,
    )
    .unwrap();

    let err = catalog::load_registry(dir.path()).unwrap_err();
    assert!(matches!(err, Error::CircularDependency(_)));
    assert!(err.is_config());
}

#[test]
fn missing_directory_is_a_config_error() {
    let err = catalog::load_dir(Path::new("/nonexistent/catalog")).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.is_config());
}

#[test]
fn runtime_errors_are_not_config_errors() {
    assert!(!Error::NotFound("job 1".into()).is_config());
    assert!(
        !Error::DependenciesNotMet {
            work_type: "sync:prices".into(),
            missing: vec!["sync:portfolio".into()],
        }
        .is_config()
    );
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hook_receives_work_item_in_environment() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out.txt");
    write_script(
        dir.path(),
        "record.sh",
        &format!("echo \"$WORK_TYPE $WORK_SUBJECT $1\" > {}", out.display()),
    );
    let specs = catalog::parse(
        r#"
[[work]]
id = "sync:prices"
command = "record.sh"
args = ["hello"]
"#,
    )
    .unwrap();
    let wt = specs[0].clone().into_work_type(dir.path());

    wt.execute(ctx("US0378331005")).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(&out).unwrap().trim(),
        "sync:prices US0378331005 hello"
    );
}

#[tokio::test]
async fn hook_receives_job_payload_as_json() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("payload.json");
    write_script(
        dir.path(),
        "record.sh",
        &format!("printf '%s' \"$WORK_PAYLOAD\" > {}", out.display()),
    );
    let specs = catalog::parse("[[work]]\nid = \"rebalance\"\ncommand = \"record.sh\"\n").unwrap();
    let wt = specs[0].clone().into_work_type(dir.path());

    let mut context = ctx("");
    context.payload.insert("target".into(), serde_json::json!("60/40"));
    context.payload.insert("dry_run".into(), serde_json::json!(true));
    wt.execute(context).await.unwrap();

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(written, serde_json::json!({"target": "60/40", "dry_run": true}));
}

#[tokio::test]
async fn hook_payload_defaults_to_an_empty_object() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("payload.json");
    write_script(
        dir.path(),
        "record.sh",
        &format!("printf '%s' \"$WORK_PAYLOAD\" > {}", out.display()),
    );
    let specs = catalog::parse("[[work]]\nid = \"sync\"\ncommand = \"record.sh\"\n").unwrap();
    let wt = specs[0].clone().into_work_type(dir.path());

    wt.execute(ctx("")).await.unwrap();
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "{}");
}

#[tokio::test]
async fn hook_success_reports_final_progress() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "ok.sh", "exit 0");
    let specs = catalog::parse("[[work]]\nid = \"ok\"\ncommand = \"ok.sh\"\n").unwrap();
    let wt = specs[0].clone().into_work_type(dir.path());

    let bus = Arc::new(EventBus::default());
    let mut sub = bus.subscribe([EventType::WorkProgress]);
    let context = WorkContext {
        subject: String::new(),
        cancel: CancellationToken::new(),
        progress: ProgressReporter::new(
            Arc::clone(&bus),
            portfolio_work::model::work::WorkItem::global("ok"),
            "ok",
        ),
        payload: serde_json::Map::new(),
    };
    wt.execute(context).await.unwrap();

    let event = sub.try_recv().expect("progress reported");
    assert_eq!(event.data["progress"]["current"], 1);
    assert_eq!(event.data["progress"]["total"], 1);
}

#[tokio::test]
async fn hook_nonzero_exit_is_an_error() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "fail.sh", "exit 3");
    let specs = catalog::parse("[[work]]\nid = \"fail\"\ncommand = \"fail.sh\"\n").unwrap();
    let wt = specs[0].clone().into_work_type(dir.path());

    let err = wt.execute(ctx("")).await.unwrap_err();
    assert!(err.to_string().contains("status 3"), "got {err}");
}

#[tokio::test]
async fn hook_is_killed_on_cancel() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "hang.sh", "sleep 30");
    let specs = catalog::parse("[[work]]\nid = \"hang\"\ncommand = \"hang.sh\"\n").unwrap();
    let wt = specs[0].clone().into_work_type(dir.path());

    let context = ctx("");
    let cancel = context.cancel.clone();
    let run = tokio::spawn(wt.execute(context));
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("hook should stop promptly")
        .unwrap();
    assert!(result.unwrap_err().to_string().contains("cancelled"));
}
