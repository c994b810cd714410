//! Error types for portfolio-work.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unknown work type: {0}")]
    UnknownWorkType(String),

    #[error("work type already registered: {0}")]
    DuplicateWorkType(String),

    #[error("work type {work_type} depends on unknown work type {dependency}")]
    UnknownDependency {
        work_type: String,
        dependency: String,
    },

    #[error("circular dependency: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    #[error("dependencies not met for {work_type}: {}", .missing.join(", "))]
    DependenciesNotMet {
        work_type: String,
        missing: Vec<String>,
    },

    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Configuration errors abort startup; everything else is per-item.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::DuplicateWorkType(_)
                | Error::UnknownDependency { .. }
                | Error::CircularDependency(_)
                | Error::Config(_)
                | Error::Toml(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
