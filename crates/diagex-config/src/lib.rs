//! Configuration management for diagex.
//!
//! Parses `diagex.toml` with serde, discovering it in the current directory
//! or its parents. Relative paths are resolved against the directory holding
//! the file. CLI settings are applied on top via [`CliSettings`].
//!
//! ## Environment Variable Expansion
//!
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default
//!
//! Expanded fields:
//! - `scan.source_dir`
//! - `export.output_dir`
//! - `renderer.kroki_url`
//! - `renderer.command`
//! - `cache.dir`
//!
//! ## Example
//!
//! ```toml
//! [scan]
//! source_dir = "docs"
//! max_depth = 6
//!
//! [export]
//! formats = ["svg", "png"]
//! output_dir = "site/diagrams"
//! organize_by_format = true
//!
//! [renderer]
//! backend = "kroki"
//! kroki_url = "${KROKI_URL:-https://kroki.io}"
//!
//! [timeouts.export]
//! hard_secs = 60
//! nuclear_secs = 90
//! ```

mod expand;

use std::path::{Path, PathBuf};
use std::time::Duration;

use diagex_batch::{
    BatchExportConfig, DEFAULT_MAX_CONCURRENCY, NamingStrategy, OverwritePolicy, RetryPolicy,
};
use diagex_render::{
    Backend, DEFAULT_BACKGROUND, DEFAULT_COMMAND, DEFAULT_KROKI_URL, DEFAULT_REQUEST_TIMEOUT,
    ExportFormat, Theme,
};
use diagex_scan::{DEFAULT_MAX_DEPTH, ScanOptions};
use diagex_supervisor::{DEFAULT_EXPORT_COOLDOWN, Deadlines, TimeoutPolicy};
use serde::Deserialize;

/// CLI settings that override configuration file values.
///
/// Only `Some` values override the loaded config.
#[derive(Debug, Default)]
pub struct CliSettings {
    pub source_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    /// Replaces the configured formats when non-empty.
    pub formats: Option<Vec<ExportFormat>>,
    pub theme: Option<Theme>,
    pub max_depth: Option<usize>,
    pub naming: Option<NamingStrategy>,
    pub organize_by_format: Option<bool>,
    pub overwrite: Option<OverwritePolicy>,
    pub max_concurrency: Option<usize>,
    pub backend: Option<Backend>,
    pub kroki_url: Option<String>,
    pub cache_enabled: Option<bool>,
}

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "diagex.toml";

/// Per-project data directory (cache, preferences).
const PROJECT_DIR: &str = ".diagex";

/// Application configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    scan: ScanConfigRaw,
    export: ExportConfigRaw,
    /// Retry schedule for failing exports.
    pub retry: RetryConfig,
    /// Rendering backend selection.
    pub renderer: RendererConfig,
    /// Supervision deadlines and throttle.
    pub timeouts: TimeoutsConfig,
    cache: CacheConfigRaw,

    /// Resolved scan configuration (set after loading).
    #[serde(skip)]
    pub scan_resolved: ScanConfig,
    /// Resolved export configuration (set after loading).
    #[serde(skip)]
    pub export_resolved: ExportConfig,
    /// Resolved cache configuration (set after loading).
    #[serde(skip)]
    pub cache_resolved: CacheConfig,
    /// Project data directory (`.diagex/`).
    #[serde(skip)]
    pub project_dir: PathBuf,
    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_with_base(Path::new("."))
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ScanConfigRaw {
    source_dir: Option<String>,
    max_depth: Option<usize>,
    include: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
    exclude_directories: Option<Vec<String>>,
    case_sensitive: Option<bool>,
}

/// Where and how to look for diagram sources.
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// Directory scanned when the CLI names none.
    pub source_dir: PathBuf,
    pub options: ScanOptions,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ExportConfigRaw {
    formats: Option<Vec<ExportFormat>>,
    output_dir: Option<String>,
    theme: Option<Theme>,
    naming: Option<NamingStrategy>,
    organize_by_format: Option<bool>,
    overwrite: Option<OverwritePolicy>,
    width: Option<u32>,
    height: Option<u32>,
    background_color: Option<String>,
    max_concurrency: Option<usize>,
}

/// Resolved export settings.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Empty when neither the file nor the CLI names a format.
    pub formats: Vec<ExportFormat>,
    pub output_dir: PathBuf,
    pub theme: Theme,
    pub naming: NamingStrategy,
    pub organize_by_format: bool,
    pub overwrite: OverwritePolicy,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub background_color: String,
    pub max_concurrency: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            formats: Vec::new(),
            output_dir: PathBuf::from("diagrams"),
            theme: Theme::default(),
            naming: NamingStrategy::default(),
            organize_by_format: false,
            overwrite: OverwritePolicy::default(),
            width: None,
            height: None,
            background_color: DEFAULT_BACKGROUND.to_owned(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: millis(policy.initial_delay),
            backoff_multiplier: policy.backoff_multiplier,
            max_delay_ms: millis(policy.max_delay),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// `[renderer]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub backend: Backend,
    /// Kroki server base URL.
    pub kroki_url: String,
    /// Mermaid CLI command line (program and leading arguments).
    pub command: String,
    /// Per-request timeout for Kroki.
    pub request_timeout_secs: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            kroki_url: DEFAULT_KROKI_URL.to_owned(),
            command: DEFAULT_COMMAND.to_owned(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

impl RendererConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Deadline overrides for one operation category, in seconds.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct DeadlinesConfig {
    pub soft_secs: Option<u64>,
    pub medium_secs: Option<u64>,
    pub hard_secs: Option<u64>,
    pub nuclear_secs: Option<u64>,
}

impl DeadlinesConfig {
    fn apply(self, base: Deadlines) -> Deadlines {
        let secs = |value: Option<u64>, default: Duration| value.map_or(default, Duration::from_secs);
        Deadlines {
            soft: secs(self.soft_secs, base.soft),
            medium: secs(self.medium_secs, base.medium),
            hard: secs(self.hard_secs, base.hard),
            nuclear: secs(self.nuclear_secs, base.nuclear),
        }
    }
}

/// `[timeouts]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Minimum time between export starts.
    pub cooldown_ms: u64,
    pub export: DeadlinesConfig,
    pub batch_export: DeadlinesConfig,
    pub debug: DeadlinesConfig,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: millis(DEFAULT_EXPORT_COOLDOWN),
            export: DeadlinesConfig::default(),
            batch_export: DeadlinesConfig::default(),
            debug: DeadlinesConfig::default(),
        }
    }
}

impl TimeoutsConfig {
    /// Defaults with the configured overrides applied.
    #[must_use]
    pub fn policy(&self) -> TimeoutPolicy {
        let defaults = TimeoutPolicy::default();
        TimeoutPolicy {
            export: self.export.apply(defaults.export),
            batch_export: self.batch_export.apply(defaults.batch_export),
            debug: self.debug.apply(defaults.debug),
        }
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct CacheConfigRaw {
    enabled: Option<bool>,
    dir: Option<String>,
}

/// Resolved scan-cache settings.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`renderer.kroki_url`").
        field: String,
        message: String,
    },
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

fn require_http_url(url: &str, field: &str) -> Result<(), ConfigError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{field} must start with http:// or https://"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file with optional CLI settings.
    ///
    /// If `config_path` is provided, loads from that file.
    /// Otherwise, searches for `diagex.toml` in the current directory and parents,
    /// falling back to defaults relative to the current directory.
    ///
    /// # Errors
    ///
    /// Returns error if explicit `config_path` doesn't exist, parsing fails,
    /// or the result (after CLI settings) is invalid.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = std::env::current_dir()
            .ok()
            .and_then(|cwd| Self::discover_from(&cwd))
        {
            Self::load_from_file(&discovered)?
        } else {
            Self::default_with_cwd()
        };

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
            config.validate()?;
        }

        Ok(config)
    }

    /// Search for the config file in `start` and its parents.
    #[must_use]
    pub fn discover_from(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILENAME))
            .find(|candidate| candidate.is_file())
    }

    fn default_with_cwd() -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        Self::default_with_base(&cwd)
    }

    /// Default config with paths relative to `base`.
    fn default_with_base(base: &Path) -> Self {
        let mut config = Self {
            scan: ScanConfigRaw::default(),
            export: ExportConfigRaw::default(),
            retry: RetryConfig::default(),
            renderer: RendererConfig::default(),
            timeouts: TimeoutsConfig::default(),
            cache: CacheConfigRaw::default(),
            scan_resolved: ScanConfig::default(),
            export_resolved: ExportConfig::default(),
            cache_resolved: CacheConfig::default(),
            project_dir: PathBuf::new(),
            config_path: None,
        };
        config.resolve_paths(base);
        config
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        config.expand_env_vars()?;

        let config_dir = path.parent().unwrap_or(Path::new("."));
        config.resolve_paths(config_dir);
        config.config_path = Some(path.to_path_buf());

        config.validate()?;

        Ok(config)
    }

    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        if let Some(source_dir) = &settings.source_dir {
            self.scan_resolved.source_dir.clone_from(source_dir);
        }
        if let Some(max_depth) = settings.max_depth {
            self.scan_resolved.options.max_depth = max_depth;
        }
        if let Some(output_dir) = &settings.output_dir {
            self.export_resolved.output_dir.clone_from(output_dir);
        }
        if let Some(formats) = &settings.formats
            && !formats.is_empty()
        {
            self.export_resolved.formats.clone_from(formats);
        }
        if let Some(theme) = settings.theme {
            self.export_resolved.theme = theme;
        }
        if let Some(naming) = settings.naming {
            self.export_resolved.naming = naming;
        }
        if let Some(organize) = settings.organize_by_format {
            self.export_resolved.organize_by_format = organize;
        }
        if let Some(overwrite) = settings.overwrite {
            self.export_resolved.overwrite = overwrite;
        }
        if let Some(max_concurrency) = settings.max_concurrency {
            self.export_resolved.max_concurrency = max_concurrency;
        }
        if let Some(backend) = settings.backend {
            self.renderer.backend = backend;
        }
        if let Some(kroki_url) = &settings.kroki_url {
            self.renderer.kroki_url.clone_from(kroki_url);
        }
        if let Some(enabled) = settings.cache_enabled {
            self.cache_resolved.enabled = enabled;
        }
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_renderer()?;

        self.retry
            .policy()
            .validate()
            .map_err(|e| ConfigError::Validation(format!("retry: {e}")))?;
        self.timeouts
            .policy()
            .validate()
            .map_err(|e| ConfigError::Validation(format!("timeouts: {e}")))?;

        self.scan_resolved
            .options
            .validate()
            .map_err(|e| ConfigError::Validation(format!("scan: {e}")))?;

        // Formats may still be chosen by the caller.
        let mut export = self.batch_config();
        if export.formats.is_empty() {
            export.formats.push(ExportFormat::Svg);
        }
        export
            .validate()
            .map_err(|e| ConfigError::Validation(format!("export: {e}")))?;

        Ok(())
    }

    fn validate_renderer(&self) -> Result<(), ConfigError> {
        require_non_empty(&self.renderer.kroki_url, "renderer.kroki_url")?;
        require_http_url(&self.renderer.kroki_url, "renderer.kroki_url")?;
        require_non_empty(&self.renderer.command, "renderer.command")?;
        if self.renderer.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "renderer.request_timeout_secs must be greater than 0".to_owned(),
            ));
        }
        Ok(())
    }

    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref dir) = self.scan.source_dir {
            self.scan.source_dir = Some(expand::expand_env(dir, "scan.source_dir")?);
        }
        if let Some(ref dir) = self.export.output_dir {
            self.export.output_dir = Some(expand::expand_env(dir, "export.output_dir")?);
        }
        if let Some(ref dir) = self.cache.dir {
            self.cache.dir = Some(expand::expand_env(dir, "cache.dir")?);
        }
        self.renderer.kroki_url = expand::expand_env(&self.renderer.kroki_url, "renderer.kroki_url")?;
        self.renderer.command = expand::expand_env(&self.renderer.command, "renderer.command")?;
        Ok(())
    }

    /// Fill the resolved sections, joining relative paths onto `config_dir`.
    fn resolve_paths(&mut self, config_dir: &Path) {
        let resolve = |path: Option<&str>, default: &str| config_dir.join(path.unwrap_or(default));
        self.project_dir = config_dir.join(PROJECT_DIR);

        let defaults = ScanOptions::default();
        let scan = &self.scan;
        self.scan_resolved = ScanConfig {
            source_dir: resolve(scan.source_dir.as_deref(), "."),
            options: ScanOptions {
                max_depth: scan.max_depth.unwrap_or(DEFAULT_MAX_DEPTH),
                include_patterns: scan.include.clone().unwrap_or(defaults.include_patterns),
                exclude_patterns: scan.exclude.clone().unwrap_or(defaults.exclude_patterns),
                exclude_directories: scan
                    .exclude_directories
                    .clone()
                    .unwrap_or(defaults.exclude_directories),
                case_sensitive: scan.case_sensitive.unwrap_or(defaults.case_sensitive),
            },
        };

        let export = &self.export;
        let fallback = ExportConfig::default();
        self.export_resolved = ExportConfig {
            formats: export.formats.clone().unwrap_or_default(),
            output_dir: resolve(export.output_dir.as_deref(), "diagrams"),
            theme: export.theme.unwrap_or(fallback.theme),
            naming: export.naming.unwrap_or(fallback.naming),
            organize_by_format: export.organize_by_format.unwrap_or(fallback.organize_by_format),
            overwrite: export.overwrite.unwrap_or(fallback.overwrite),
            width: export.width,
            height: export.height,
            background_color: export
                .background_color
                .clone()
                .unwrap_or(fallback.background_color),
            max_concurrency: export.max_concurrency.unwrap_or(fallback.max_concurrency),
        };

        self.cache_resolved = CacheConfig {
            enabled: self.cache.enabled.unwrap_or(true),
            dir: self
                .cache
                .dir
                .as_deref()
                .map_or_else(|| self.project_dir.join("cache"), |dir| config_dir.join(dir)),
        };
    }

    /// Batch export settings from the resolved config.
    #[must_use]
    pub fn batch_config(&self) -> BatchExportConfig {
        let export = &self.export_resolved;
        BatchExportConfig::new(export.formats.iter().copied(), export.output_dir.clone())
            .with_theme(export.theme)
            .with_naming(export.naming)
            .with_organize_by_format(export.organize_by_format)
            .with_overwrite(export.overwrite)
            .with_size(export.width, export.height)
            .with_background(export.background_color.clone())
            .with_max_concurrency(export.max_concurrency)
            .with_max_depth(self.scan_resolved.options.max_depth)
            .with_retry(self.retry.policy())
    }

    /// Path of the persisted preferences file.
    #[must_use]
    pub fn preferences_path(&self) -> PathBuf {
        self.project_dir.join("preferences.json")
    }
}
