use std::path::PathBuf;

use diagex_render::ExportFormat;

/// Invalid [`BatchExportConfig`](crate::BatchExportConfig).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("at least one output format is required")]
    EmptyFormats,
    #[error("output format {0} is listed more than once")]
    DuplicateFormat(ExportFormat),
    #[error("max depth {depth} exceeds the supported maximum of {max}")]
    InvalidDepth { depth: usize, max: usize },
    #[error("{name} must be between 1 and {max} pixels, got {value}", max = crate::config::MAX_DIMENSION)]
    InvalidDimension { name: &'static str, value: u32 },
    #[error("max concurrency must be between 1 and {max}, got {0}", max = crate::config::MAX_CONCURRENCY)]
    InvalidConcurrency(usize),
    #[error("background color must not be empty")]
    EmptyBackground,
    #[error("invalid retry policy: {0}")]
    InvalidRetry(String),
    #[error("output directory {} is a file", .0.display())]
    OutputDirIsFile(PathBuf),
}

/// Batch creation failure. No jobs exist when this is returned.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("invalid export configuration: {0}")]
    Config(#[from] ConfigValidationError),
}

/// Unrecognised naming strategy or overwrite policy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyParseError {
    #[error("unknown naming strategy '{0}' (expected sequential or descriptive)")]
    Naming(String),
    #[error("unknown overwrite policy '{0}' (expected overwrite, skip or rename)")]
    Overwrite(String),
}
