//! Scan option errors.

/// Invalid scan options.
///
/// Discovery itself is best-effort and never fails; these errors only come from
/// [`ScanOptions::validate`](crate::ScanOptions::validate).
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// A glob pattern failed to compile.
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Parser message from the glob crate.
        message: String,
    },
    /// Maximum depth outside the supported range.
    #[error("max depth {0} exceeds the supported maximum of {max}", max = crate::scanner::MAX_DEPTH_LIMIT)]
    DepthTooLarge(usize),
}
