//! Batch export configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use diagex_render::{DEFAULT_BACKGROUND, ExportFormat, RenderOptions, Theme};
use diagex_scan::{DEFAULT_MAX_DEPTH, MAX_DEPTH_LIMIT};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigValidationError, PolicyParseError};

/// Largest accepted target width or height, in pixels.
pub const MAX_DIMENSION: u32 = 10_000;

/// Largest accepted `max_concurrency`.
pub const MAX_CONCURRENCY: usize = 16;

/// Default number of concurrent renders.
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;

/// How output files are named when a source holds several diagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingStrategy {
    /// `<stem>-<n>`
    #[default]
    Sequential,
    /// `<stem>-<n>-<type>`
    Descriptive,
}

/// What to do when an output file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwritePolicy {
    #[default]
    Overwrite,
    /// Keep the existing file and record the job as skipped.
    Skip,
    /// Write to `<base>-<n>.<ext>` instead.
    Rename,
}

impl FromStr for NamingStrategy {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "descriptive" => Ok(Self::Descriptive),
            _ => Err(PolicyParseError::Naming(s.to_owned())),
        }
    }
}

impl FromStr for OverwritePolicy {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "skip" => Ok(Self::Skip),
            "rename" => Ok(Self::Rename),
            _ => Err(PolicyParseError::Overwrite(s.to_owned())),
        }
    }
}

/// Retry schedule for a failing job.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first; at least 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    /// Growth factor between consecutive delays; at least 1.0.
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the attempt following failed attempt `attempt` (1-based).
    ///
    /// `min(initial × multiplier^(attempt-1), max)`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_attempts == 0 {
            return Err(ConfigValidationError::InvalidRetry(
                "max attempts must be at least 1".to_owned(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigValidationError::InvalidRetry(format!(
                "backoff multiplier must be at least 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.max_delay < self.initial_delay {
            return Err(ConfigValidationError::InvalidRetry(
                "max delay must not be shorter than the initial delay".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Everything a batch export needs to know up front.
///
/// Build with [`BatchExportConfig::new`] and the `with_*` methods; fields are
/// public so callers can adjust them directly. The planner validates the
/// config before creating any job.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchExportConfig {
    /// Output formats; one job per diagram and format.
    pub formats: Vec<ExportFormat>,
    pub theme: Theme,
    pub output_dir: PathBuf,
    /// Directory depth used when scanning for sources.
    pub max_depth: usize,
    pub naming: NamingStrategy,
    /// Put each format under its own subdirectory (`out/svg/...`).
    pub organize_by_format: bool,
    pub overwrite: OverwritePolicy,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub background_color: String,
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
}

impl BatchExportConfig {
    #[must_use]
    pub fn new(formats: impl IntoIterator<Item = ExportFormat>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            formats: formats.into_iter().collect(),
            theme: Theme::default(),
            output_dir: output_dir.into(),
            max_depth: DEFAULT_MAX_DEPTH,
            naming: NamingStrategy::default(),
            organize_by_format: false,
            overwrite: OverwritePolicy::default(),
            width: None,
            height: None,
            background_color: DEFAULT_BACKGROUND.to_owned(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_theme(mut self, theme: Theme) -> Self {
        self.theme = theme;
        self
    }

    #[must_use]
    pub fn with_naming(mut self, naming: NamingStrategy) -> Self {
        self.naming = naming;
        self
    }

    #[must_use]
    pub fn with_organize_by_format(mut self, organize: bool) -> Self {
        self.organize_by_format = organize;
        self
    }

    #[must_use]
    pub fn with_overwrite(mut self, overwrite: OverwritePolicy) -> Self {
        self.overwrite = overwrite;
        self
    }

    #[must_use]
    pub fn with_size(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    #[must_use]
    pub fn with_background(mut self, color: impl Into<String>) -> Self {
        self.background_color = color.into();
        self
    }

    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Check every field once.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.formats.is_empty() {
            return Err(ConfigValidationError::EmptyFormats);
        }
        for (i, format) in self.formats.iter().enumerate() {
            if self.formats[..i].contains(format) {
                return Err(ConfigValidationError::DuplicateFormat(*format));
            }
        }
        if self.max_depth > MAX_DEPTH_LIMIT {
            return Err(ConfigValidationError::InvalidDepth {
                depth: self.max_depth,
                max: MAX_DEPTH_LIMIT,
            });
        }
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if let Some(value) = value
                && !(1..=MAX_DIMENSION).contains(&value)
            {
                return Err(ConfigValidationError::InvalidDimension { name, value });
            }
        }
        if !(1..=MAX_CONCURRENCY).contains(&self.max_concurrency) {
            return Err(ConfigValidationError::InvalidConcurrency(self.max_concurrency));
        }
        if self.background_color.trim().is_empty() {
            return Err(ConfigValidationError::EmptyBackground);
        }
        self.retry.validate()?;
        if self.output_dir.exists() && !self.output_dir.is_dir() {
            return Err(ConfigValidationError::OutputDirIsFile(self.output_dir.clone()));
        }
        Ok(())
    }

    /// Render options shared by every job; the format is set per job.
    #[must_use]
    pub fn render_options(&self, format: ExportFormat) -> RenderOptions {
        RenderOptions::new(format)
            .with_theme(self.theme)
            .with_size(self.width, self.height)
            .with_background(self.background_color.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BatchExportConfig {
        BatchExportConfig::new([ExportFormat::Svg], "out")
    }

    #[test]
    fn test_parse_policy_names() {
        assert_eq!("Descriptive".parse(), Ok(NamingStrategy::Descriptive));
        assert_eq!(" skip ".parse(), Ok(OverwritePolicy::Skip));
        assert_eq!(
            "clobber".parse::<OverwritePolicy>(),
            Err(PolicyParseError::Overwrite("clobber".to_owned()))
        );
    }

    #[test]
    fn test_retry_delays_grow_and_cap() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_secs(1));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_secs(2));
        assert_eq!(retry.delay_for_attempt(4), Duration::from_secs(4));
        assert_eq!(retry.delay_for_attempt(5), Duration::from_secs(5));
        assert_eq!(retry.delay_for_attempt(500), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_validation() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::none().validate().is_ok());

        let zero = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(zero.validate().is_err());

        let shrinking = RetryPolicy {
            backoff_multiplier: 0.5,
            ..RetryPolicy::default()
        };
        assert!(shrinking.validate().is_err());
    }

    #[test]
    fn test_empty_formats_rejected() {
        let mut config = config();
        config.formats.clear();
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "at least one output format is required");
    }

    #[test]
    fn test_duplicate_format_rejected() {
        let config = BatchExportConfig::new([ExportFormat::Png, ExportFormat::Png], "out");
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::DuplicateFormat(ExportFormat::Png))
        ));
    }

    #[test]
    fn test_dimension_and_concurrency_bounds() {
        assert!(config().with_size(Some(800), Some(600)).validate().is_ok());
        assert!(matches!(
            config().with_size(Some(0), None).validate(),
            Err(ConfigValidationError::InvalidDimension { name: "width", .. })
        ));
        assert!(matches!(
            config().with_size(None, Some(MAX_DIMENSION + 1)).validate(),
            Err(ConfigValidationError::InvalidDimension { name: "height", .. })
        ));
        assert!(config().with_max_concurrency(0).validate().is_err());
        assert!(config().with_max_concurrency(MAX_CONCURRENCY + 1).validate().is_err());
        assert!(config().with_max_depth(MAX_DEPTH_LIMIT + 1).validate().is_err());
    }

    #[test]
    fn test_output_dir_must_not_be_a_file() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let config = BatchExportConfig::new([ExportFormat::Svg], temp.path());
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::OutputDirIsFile(_))
        ));
    }

    #[test]
    fn test_render_options_follow_config() {
        let options = config()
            .with_theme(Theme::Neutral)
            .with_size(Some(640), None)
            .with_background("transparent")
            .render_options(ExportFormat::Png);
        assert_eq!(options.format, ExportFormat::Png);
        assert_eq!(options.theme, Theme::Neutral);
        assert_eq!(options.width, Some(640));
        assert_eq!(options.background_color, "transparent");
    }
}
