use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("unknown user {0}")]
    UnknownUser(Uuid),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid interaction reference: {0}")]
    InvalidReference(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures of one oracle exchange. Any of them skips the item class for the
/// current cycle.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle could not be started: {0}")]
    Unavailable(#[source] std::io::Error),

    #[error("oracle exited with {status}: {stderr}")]
    Exited { status: String, stderr: String },

    #[error("oracle did not answer within {0:?}")]
    Timeout(Duration),

    #[error("oracle output is not a numeric matrix: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("oracle returned shape {found}, expected {rows}x{columns}")]
    ShapeMismatch {
        rows: usize,
        columns: usize,
        found: String,
    },

    #[error("oracle task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("failed to snapshot ledger and catalogs: {0}")]
    Snapshot(#[source] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    NotPositive { name: &'static str },

    #[error("ORACLE_COMMAND is set but empty")]
    EmptyOracleCommand,
}
