use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by (or on behalf of) a host collaborator.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("host collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("host rejected request: {0}")]
    Rejected(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}

/// Errors surfaced on operator-facing paths (settings files, CLI).
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error(transparent)]
    Host(#[from] HostError),

    #[error("invalid budget settings: {0}")]
    InvalidSettings(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BudgetError>;
