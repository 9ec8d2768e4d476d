//! Error types for scenario runs.

use lockstep_runtime::{JoinError, RuntimeError, SyncError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("synchronization error: {0}")]
    Sync(#[from] SyncError),

    #[error("worker failed: {0}")]
    Join(#[from] JoinError),

    #[error("invalid scenario file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("histogram setup failed: {0}")]
    Histogram(#[from] hdrhistogram::CreationError),

    #[error("report serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
