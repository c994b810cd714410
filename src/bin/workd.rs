//! workd: daemon and operator CLI for the portfolio work engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use portfolio_work::bus::EventBus;
use portfolio_work::catalog;
use portfolio_work::config::Config;
use portfolio_work::db::Db;
use portfolio_work::engine::Engine;
use portfolio_work::http::{self, AppState};
use portfolio_work::market::{CalendarMarketHours, MarketTimingGate};
use portfolio_work::model::job::NewJob;
use portfolio_work::model::work::Priority;
use portfolio_work::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "workd", about = "Portfolio work orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler, job queue, and HTTP API
    Serve {
        /// Directory containing work type TOML files
        #[arg(long, default_value = "work")]
        catalog: PathBuf,
        /// Exchange calendar TOML. Without it only any-time work runs.
        #[arg(long)]
        markets: Option<PathBuf>,
    },
    /// Show registered work types with last and next run
    Status {
        #[arg(long, default_value = "work")]
        catalog: PathBuf,
    },
    /// Queue an on-demand run of a work type
    Trigger {
        work_type: String,
        /// Subject to run for. Omitted = the global item.
        #[arg(long, default_value = "")]
        subject: String,
        /// JSON object passed with the job
        #[arg(long)]
        payload: Option<String>,
        /// critical, high, medium, or low. Defaults to the work type's priority.
        #[arg(long)]
        priority: Option<Priority>,
        #[arg(long, default_value = "work")]
        catalog: PathBuf,
    },
    /// Show recent job runs
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve { catalog, markets } => cmd_serve(config, &catalog, markets.as_deref()).await,
        Command::Status { catalog } => cmd_status(config, &catalog).await,
        Command::Trigger {
            work_type,
            subject,
            payload,
            priority,
            catalog,
        } => cmd_trigger(config, &catalog, work_type, subject, payload, priority).await,
        Command::History { limit } => cmd_history(config, limit).await,
    }
}

async fn open_engine(config: &Config, catalog_dir: &Path, gate: MarketTimingGate) -> anyhow::Result<Engine> {
    let db = Db::connect(&config.database_url).await?;
    db.migrate().await?;
    let registry = catalog::load_registry(catalog_dir).map_err(|e| {
        if e.is_config() {
            anyhow::anyhow!("invalid work catalog in {}: {e}", catalog_dir.display())
        } else {
            anyhow::Error::from(e)
        }
    })?;
    let bus = Arc::new(EventBus::new(config.event_buffer));
    Ok(Engine::new(db, registry, gate, bus, config.engine_config()).await?)
}

async fn cmd_serve(config: Config, catalog_dir: &Path, markets: Option<&Path>) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig::from_config(&config))?;

    let gate = match markets {
        Some(path) => MarketTimingGate::new(Arc::new(CalendarMarketHours::load(path)?)),
        None => {
            tracing::warn!("no market calendar configured, market-timed work will not run");
            MarketTimingGate::unavailable()
        }
    };

    let engine = open_engine(&config, catalog_dir, gate).await?;
    engine.start().await?;

    let state = AppState::from_engine(&engine, config.event_heartbeat);
    let server = tokio::spawn(http::serve(config.bind_addr, state));

    tokio::signal::ctrl_c().await?;
    engine.shutdown().await;
    server.await??;
    Ok(())
}

async fn cmd_status(config: Config, catalog_dir: &Path) -> anyhow::Result<()> {
    let engine = open_engine(&config, catalog_dir, MarketTimingGate::unavailable()).await?;
    let rows = portfolio_work::status::snapshot(engine.registry(), engine.tracker());

    if rows.is_empty() {
        println!("No work types registered.");
        return Ok(());
    }

    println!(
        "{:<28}  {:<8}  {:<22}  {:<8}  {:<20}  NEXT RUN",
        "WORK TYPE", "PRIORITY", "TIMING", "INTERVAL", "LAST RUN"
    );
    println!("{}", "-".repeat(110));
    for row in &rows {
        println!(
            "{:<28}  {:<8}  {:<22}  {:<8}  {:<20}  {}",
            row.id,
            row.priority.as_str(),
            row.market_timing.as_str(),
            row.interval,
            row.last_run
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            row.next_run
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    println!("\n{} work type(s)", rows.len());
    Ok(())
}

async fn cmd_trigger(
    config: Config,
    catalog_dir: &Path,
    work_type: String,
    subject: String,
    payload: Option<String>,
    priority: Option<Priority>,
) -> anyhow::Result<()> {
    let engine = open_engine(&config, catalog_dir, MarketTimingGate::unavailable()).await?;

    let mut new = NewJob::new(work_type).subject(subject);
    if let Some(json) = payload {
        new = new.payload(serde_json::from_str(&json)?);
    }
    if let Some(priority) = priority {
        new = new.priority(priority);
    }

    let job = engine.queue().enqueue(new).await?;
    println!("Queued: {} ({} / {})", job.id, job.work_type, job.priority);
    Ok(())
}

async fn cmd_history(config: Config, limit: usize) -> anyhow::Result<()> {
    let db = Db::connect(&config.database_url).await?;
    db.migrate().await?;
    let runs = db.recent_runs(limit).await?;

    if runs.is_empty() {
        println!("No job runs recorded.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<28}  {:<14}  {:<3}  {:<9}  {:<20}  ERROR",
        "JOB", "WORK TYPE", "SUBJECT", "TRY", "STATUS", "FINISHED"
    );
    println!("{}", "-".repeat(110));
    for run in &runs {
        let short_id = &run.job_id.to_string()[..8];
        println!(
            "{:<8}  {:<28}  {:<14}  {:<3}  {:<9}  {:<20}  {}",
            short_id,
            run.work_type,
            if run.subject.is_empty() { "-" } else { &run.subject },
            run.attempt,
            run.status.as_str(),
            run.finished_at.format("%Y-%m-%d %H:%M:%S"),
            run.error.as_deref().unwrap_or(""),
        );
    }
    println!("\n{} run(s)", runs.len());
    Ok(())
}
