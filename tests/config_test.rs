use std::time::Duration;

use portfolio_work::config::Config;
use portfolio_work::error::Error;

// Env vars are process-global, so every case runs in one test.
#[test]
fn config_from_env() {
    unsafe {
        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("WORK_MAX_WORKERS");
        std::env::remove_var("JOB_RETRY_BASE_MS");
    }
    assert!(matches!(Config::from_env(), Err(Error::Config(_))));

    // Required field only: everything else defaults.
    unsafe {
        std::env::set_var("DATABASE_URL", "sqlite://work-test.db");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.database_url, "sqlite://work-test.db");
    assert!(!config.log_level.is_empty());
    assert_eq!(config.bind_addr.port(), 8080);
    assert_eq!(config.max_workers, 4);
    assert_eq!(config.poll_interval, Duration::from_secs(60));
    assert_eq!(config.job_max_retries, 3);
    assert_eq!(config.job_retry_base, Duration::from_millis(1000));
    assert_eq!(config.job_retry_max, Duration::from_millis(300_000));

    let engine = config.engine_config();
    assert_eq!(engine.max_workers, 4);
    assert_eq!(engine.queue.max_retries, 3);
    assert_eq!(engine.queue.history_limit, config.job_history_limit);

    // Overrides are parsed.
    unsafe {
        std::env::set_var("WORK_MAX_WORKERS", "8");
        std::env::set_var("JOB_RETRY_BASE_MS", "250");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.max_workers, 8);
    assert_eq!(config.engine_config().queue.retry_base, Duration::from_millis(250));

    // Malformed values fail fast.
    unsafe {
        std::env::set_var("WORK_MAX_WORKERS", "lots");
    }
    let err = Config::from_env().unwrap_err();
    assert!(err.to_string().contains("WORK_MAX_WORKERS"), "got {err}");

    unsafe {
        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("WORK_MAX_WORKERS");
        std::env::remove_var("JOB_RETRY_BASE_MS");
    }
}
