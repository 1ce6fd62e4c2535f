use crate::format::ExportFormat;

/// Render failure.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("{renderer} renderer cannot produce {format} output")]
    UnsupportedFormat {
        renderer: &'static str,
        format: ExportFormat,
    },
    #[error("{command} exited with {status}: {stderr}")]
    Process {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid {format} output: {reason}")]
    InvalidOutput {
        format: ExportFormat,
        reason: String,
    },
}

impl RenderError {
    /// Whether trying again could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::UnsupportedFormat { .. })
    }
}

/// Unrecognised format or theme name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown export format '{0}' (expected svg, png, jpg, webp or pdf)")]
    Format(String),
    #[error("unknown theme '{0}' (expected default, dark, forest or neutral)")]
    Theme(String),
    #[error("unknown renderer backend '{0}' (expected auto, kroki or cli)")]
    Backend(String),
}
