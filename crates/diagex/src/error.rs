//! CLI error types.

use diagex_batch::BatchError;
use diagex_config::ConfigError;
use diagex_scan::ScanError;
use diagex_supervisor::PolicyError;

/// CLI error type.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Scan(#[from] ScanError),

    #[error("{0}")]
    Batch(#[from] BatchError),

    #[error("{0}")]
    Policy(#[from] PolicyError),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Export(String),
}
