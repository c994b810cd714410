//! Integration tests for work type registration and dependency validation.

use std::time::Duration;

use portfolio_work::error::Error;
use portfolio_work::model::work::{Priority, WorkType};
use portfolio_work::registry::Registry;

fn work(id: &str) -> WorkType {
    WorkType::new(id, |_ctx| async { Ok(()) }).interval(Duration::from_secs(60))
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

#[test]
fn register_and_lookup() {
    let mut registry = Registry::new();
    registry.register(work("sync:portfolio")).unwrap();

    assert!(registry.contains("sync:portfolio"));
    assert_eq!(registry.get("sync:portfolio").unwrap().id, "sync:portfolio");
    assert!(registry.get("sync:prices").is_none());
    assert_eq!(registry.len(), 1);
}

#[test]
fn duplicate_id_is_rejected() {
    let mut registry = Registry::new();
    registry.register(work("sync:portfolio")).unwrap();

    let err = registry.register(work("sync:portfolio")).unwrap_err();
    assert!(matches!(err, Error::DuplicateWorkType(ref id) if id == "sync:portfolio"));
    assert!(err.is_config());
    assert_eq!(registry.len(), 1);
}

#[test]
fn duplicate_within_batch_is_rejected() {
    let mut registry = Registry::new();
    let err = registry
        .register_all(vec![work("a"), work("b"), work("a")])
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateWorkType(_)));
    assert!(registry.is_empty());
}

#[test]
fn unknown_dependency_is_rejected() {
    let mut registry = Registry::new();
    let err = registry
        .register(work("sync:prices").depends_on(["sync:portfolio"]))
        .unwrap_err();

    match err {
        Error::UnknownDependency {
            work_type,
            dependency,
        } => {
            assert_eq!(work_type, "sync:prices");
            assert_eq!(dependency, "sync:portfolio");
        }
        other => panic!("expected UnknownDependency, got {other:?}"),
    }
}

#[test]
fn dependency_registered_earlier_is_accepted() {
    let mut registry = Registry::new();
    registry.register(work("sync:portfolio")).unwrap();
    registry
        .register(work("sync:prices").depends_on(["sync:portfolio"]))
        .unwrap();
    assert_eq!(registry.len(), 2);
}

#[test]
fn batch_allows_forward_references() {
    let mut registry = Registry::new();
    registry
        .register_all(vec![
            work("metrics:calculate").depends_on(["sync:prices"]),
            work("sync:prices").depends_on(["sync:portfolio"]),
            work("sync:portfolio"),
        ])
        .unwrap();
    assert_eq!(registry.len(), 3);
}

// ---------------------------------------------------------------------------
// Cycles
// ---------------------------------------------------------------------------

#[test]
fn self_dependency_is_a_cycle() {
    let mut registry = Registry::new();
    let err = registry
        .register_all(vec![work("a").depends_on(["a"])])
        .unwrap_err();
    match err {
        Error::CircularDependency(path) => assert_eq!(path, vec!["a", "a"]),
        other => panic!("expected CircularDependency, got {other:?}"),
    }
}

#[test]
fn cycle_in_batch_is_rejected_atomically() {
    let mut registry = Registry::new();
    registry.register(work("base")).unwrap();

    let err = registry
        .register_all(vec![
            work("a").depends_on(["base", "b"]),
            work("b").depends_on(["c"]),
            work("c").depends_on(["a"]),
        ])
        .unwrap_err();

    match err {
        Error::CircularDependency(path) => {
            assert_eq!(path.first(), path.last());
            assert_eq!(path.len(), 4, "a -> b -> c -> a, got {path:?}");
        }
        other => panic!("expected CircularDependency, got {other:?}"),
    }
    assert_eq!(registry.len(), 1, "nothing from the bad batch is registered");
    assert!(!registry.contains("a"));
}

#[test]
fn diamond_is_not_a_cycle() {
    let mut registry = Registry::new();
    registry
        .register_all(vec![
            work("root"),
            work("left").depends_on(["root"]),
            work("right").depends_on(["root"]),
            work("join").depends_on(["left", "right"]),
        ])
        .unwrap();
    assert_eq!(registry.len(), 4);
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[test]
fn all_is_priority_ordered_then_registration_ordered() {
    let mut registry = Registry::new();
    registry
        .register_all(vec![
            work("low-1").priority(Priority::Low),
            work("medium-1"),
            work("critical-1").priority(Priority::Critical),
            work("medium-2"),
            work("high-1").priority(Priority::High),
            work("critical-2").priority(Priority::Critical),
        ])
        .unwrap();

    let ids: Vec<&str> = registry.all().iter().map(|wt| wt.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "critical-1",
            "critical-2",
            "high-1",
            "medium-1",
            "medium-2",
            "low-1"
        ]
    );
}
