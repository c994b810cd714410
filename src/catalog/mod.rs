//! Work type catalog loaded from TOML, with command-hook task bodies.
//!
//! Each `.toml` file in the catalog directory declares one or more work
//! types. A work type's body is an executable run with the work item in its
//! environment (`WORK_TYPE`, `WORK_SUBJECT`, and the job payload as JSON in
//! `WORK_PAYLOAD`); exit status 0 is success.
//!
//! ```toml
//! [[work]]
//! id = "sync:prices"
//! description = "Sync security prices"
//! priority = "high"
//! market_timing = "during_market_open"
//! interval_secs = 300
//! depends_on = ["sync:portfolio"]
//! subjects = ["US0378331005", "NL0010273215"]
//! command = "hooks/sync-prices.sh"
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::work::{MarketTiming, Priority, WorkContext, WorkType};
use crate::registry::Registry;

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    work: Vec<WorkSpec>,
}

/// One work type as declared in TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkSpec {
    pub id: String,
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub market_timing: MarketTiming,
    /// Zero (the default) makes the type on-demand only.
    #[serde(default)]
    pub interval_secs: u64,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Fixed subject list. Omitted = a single subject-less item.
    pub subjects: Option<Vec<String>>,
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl WorkSpec {
    /// Turn the declaration into a runnable work type.
    ///
    /// Relative commands resolve against `base_dir`, the directory holding
    /// the catalog file.
    pub fn into_work_type(self, base_dir: &Path) -> WorkType {
        let command = if self.command.is_relative() {
            base_dir.join(&self.command)
        } else {
            self.command.clone()
        };
        let hook = Hook {
            work_type: self.id.clone(),
            command,
            args: self.args,
        };

        let mut wt = WorkType::new(self.id.clone(), move |ctx| {
            let hook = hook.clone();
            async move { hook.run(ctx).await }
        })
        .description(self.description.unwrap_or_else(|| self.id.clone()))
        .priority(self.priority)
        .market_timing(self.market_timing)
        .interval(Duration::from_secs(self.interval_secs))
        .depends_on(self.depends_on);

        if let Some(subjects) = self.subjects {
            wt = wt.subjects(move || subjects.clone());
        }
        wt
    }
}

/// Load every `.toml` file in `dir`, in file-name order.
pub fn load_dir(dir: &Path) -> Result<Vec<WorkType>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| Error::Config(format!("cannot read catalog dir {}: {e}", dir.display())))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "toml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut work_types = Vec::new();
    for path in paths {
        let content = std::fs::read_to_string(&path)?;
        let base_dir = path.parent().unwrap_or(dir);
        let specs = parse(&content)
            .map_err(|e| Error::Config(format!("bad catalog file {}: {e}", path.display())))?;
        debug!(file = %path.display(), work_types = specs.len(), "loaded catalog file");
        work_types.extend(specs.into_iter().map(|s| s.into_work_type(base_dir)));
    }
    Ok(work_types)
}

/// Parse one catalog file's contents.
pub fn parse(content: &str) -> Result<Vec<WorkSpec>> {
    let file: CatalogFile = toml::from_str(content)?;
    Ok(file.work)
}

/// Build a registry from the catalog in `dir`. Dependencies may reference
/// work types declared in any file.
pub fn load_registry(dir: &Path) -> Result<Registry> {
    let work_types = load_dir(dir)?;
    let mut registry = Registry::new();
    registry.register_all(work_types)?;
    info!(work_types = registry.len(), dir = %dir.display(), "work type catalog loaded");
    Ok(registry)
}

// ---------------------------------------------------------------------------
// Hook execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Hook {
    work_type: String,
    command: PathBuf,
    args: Vec<String>,
}

impl Hook {
    /// Run the command to completion, killing it if the work is cancelled.
    async fn run(&self, ctx: WorkContext) -> anyhow::Result<()> {
        debug!(
            work_type = %self.work_type,
            subject = %ctx.subject,
            command = %self.command.display(),
            "running hook"
        );

        let payload = serde_json::to_string(&ctx.payload)?;
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .env("WORK_TYPE", &self.work_type)
            .env("WORK_SUBJECT", &ctx.subject)
            .env("WORK_PAYLOAD", payload)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("spawn {}: {e}", self.command.display()))?;

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = ctx.cancel.cancelled() => {
                child.kill().await.ok();
                anyhow::bail!("{} cancelled", self.work_type);
            }
        };

        if status.success() {
            ctx.progress.report(1, 1, "hook finished");
            Ok(())
        } else {
            anyhow::bail!(
                "{} hook exited with status {}",
                self.work_type,
                status.code().unwrap_or(-1)
            )
        }
    }
}
