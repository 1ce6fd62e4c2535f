//! `diagex export` command implementation.

use std::path::{Path, PathBuf};

use clap::Args;
use diagex_batch::{
    Batch, BatchExportConfig, BatchResult, ExecutionStrategy, ExportCoordinator, NamingStrategy,
    OverwritePolicy, Phase, ProgressReporter, ProgressTracker, create_batch, validate_batch,
};
use diagex_config::{CliSettings, Config};
use diagex_render::{AnyRenderer, Backend, ExportFormat, Renderer, Theme};
use diagex_scan::{DiagramSource, Scanner};
use diagex_supervisor::TimeoutSupervisor;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use super::{open_cache, renderers};
use crate::error::CliError;
use crate::output::Output;
use crate::preferences::Preferences;

/// Arguments for the export command.
#[derive(Args)]
pub(crate) struct ExportArgs {
    /// Directory to scan for diagrams (overrides config).
    dir: Option<PathBuf>,

    /// Output format; repeat for several (svg, png, jpg, webp, pdf).
    #[arg(short, long = "format", value_name = "FORMAT")]
    formats: Vec<ExportFormat>,

    /// Output directory (overrides config).
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Mermaid theme (default, dark, forest, neutral).
    #[arg(long)]
    theme: Option<Theme>,

    /// Put each format in its own subdirectory.
    #[arg(long)]
    organize_by_format: bool,

    /// What to do with existing outputs (overwrite, skip, rename).
    #[arg(long)]
    overwrite: Option<OverwritePolicy>,

    /// File naming for multi-diagram sources (sequential, descriptive).
    #[arg(long)]
    naming: Option<NamingStrategy>,

    /// Directory levels to descend into (overrides config).
    #[arg(long)]
    max_depth: Option<usize>,

    /// Maximum renders in flight (overrides config).
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Render one diagram at a time.
    #[arg(long)]
    sequential: bool,

    /// Rendering backend (auto, kroki, cli).
    #[arg(long)]
    backend: Option<Backend>,

    /// Kroki server URL (overrides config).
    #[arg(long)]
    kroki_url: Option<String>,

    /// Show the plan without rendering anything.
    #[arg(long)]
    dry_run: bool,

    /// Write a JSON summary of the run to this file.
    #[arg(long, value_name = "PATH")]
    summary: Option<PathBuf>,

    /// Disable the analysis cache.
    #[arg(long)]
    no_cache: bool,

    /// Path to configuration file (default: auto-discover diagex.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl ExportArgs {
    /// Execute the export command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration, planning or any export job fails,
    /// or the run is cancelled.
    pub(crate) fn execute(self, version: &str) -> Result<(), CliError> {
        let output = Output::new();

        let cli_settings = CliSettings {
            source_dir: self.dir.clone(),
            output_dir: self.output_dir.clone(),
            formats: Some(self.formats.clone()),
            theme: self.theme,
            max_depth: self.max_depth,
            naming: self.naming,
            organize_by_format: self.organize_by_format.then_some(true),
            overwrite: self.overwrite,
            max_concurrency: self.jobs,
            backend: self.backend,
            kroki_url: self.kroki_url.clone(),
            cache_enabled: self.no_cache.then_some(false),
        };
        let config = Config::load(self.config.as_deref(), Some(&cli_settings))?;

        let root = &config.scan_resolved.source_dir;
        if !root.is_dir() {
            return Err(CliError::Validation(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        // Tracked from discovery on, under the id the batch will carry.
        let tracker = ProgressTracker::new();
        let reporter = tracker.create_reporter(Uuid::new_v4());

        // Discovery
        reporter.set_phase(Phase::Discovery, format!("Scanning {}", root.display()));
        output.info(&format!("Scanning {}...", root.display()));
        let cache = open_cache(&config, version)?;
        let outcome = Scanner::with_cache(cache.as_ref())
            .scan_with_stats(root, &config.scan_resolved.options);
        if outcome.total_diagrams() == 0 {
            output.warning("No diagrams found.");
            return Ok(());
        }
        output.info(&format!(
            "Found {} diagrams in {} files",
            outcome.total_diagrams(),
            outcome.sources.len()
        ));

        // Planning
        let preferences_path = config.preferences_path();
        let mut preferences = Preferences::load(&preferences_path);
        let mut batch_config = config.batch_config();
        if batch_config.formats.is_empty() {
            batch_config.formats = preferences.default_formats(source_paths(&outcome.sources));
            if batch_config.formats.is_empty() {
                batch_config.formats.push(ExportFormat::Svg);
            }
            tracing::info!(formats = ?batch_config.formats, "No formats requested, using defaults");
        }

        let batch = plan_batch(&reporter, &outcome.sources, &batch_config, self.sequential)?;
        check_plan(&output, &batch)?;
        print_plan(&output, &batch);

        if self.dry_run {
            print_dry_run(&output, &batch);
            return Ok(());
        }

        // Execution
        let runtime = tokio::runtime::Runtime::new()?;
        let result = runtime.block_on(run_batch(&config, &batch, &tracker, &reporter))?;
        output.finish_progress();

        print_result(&output, &result);

        if let Some(path) = &self.summary {
            write_summary(path, &result)?;
            output.info(&format!("Summary written to {}", path.display()));
        }

        if result.summary.successful > result.summary.skipped {
            preferences.record_export(source_paths(&outcome.sources), &batch.config.formats);
            if let Err(e) = preferences.save(&preferences_path) {
                tracing::warn!(path = %preferences_path.display(), error = %e, "Failed to save preferences");
            }
        }

        if result.cancelled {
            return Err(CliError::Export("export cancelled".to_owned()));
        }
        if result.summary.failed > 0 {
            return Err(CliError::Export(format!(
                "{} of {} exports failed",
                result.summary.failed, result.summary.total
            )));
        }
        Ok(())
    }
}

fn source_paths(sources: &[DiagramSource]) -> impl Iterator<Item = &Path> {
    sources
        .iter()
        .filter(|source| !source.diagrams.is_empty())
        .map(|source| source.relative_path.as_path())
}

/// Plan the batch under the reporter's id.
fn plan_batch(
    reporter: &ProgressReporter,
    sources: &[DiagramSource],
    config: &BatchExportConfig,
    sequential: bool,
) -> Result<Batch, CliError> {
    reporter.set_phase(Phase::Planning, format!("Planning exports for {} files", sources.len()));
    let mut batch = create_batch(sources, config)?.with_id(reporter.batch_id());
    if sequential {
        batch = batch.with_strategy(ExecutionStrategy::Sequential);
    }
    reporter.set_total(batch.jobs.len());
    Ok(batch)
}

/// Print plan findings; errors abort the run.
fn check_plan(output: &Output, batch: &Batch) -> Result<(), CliError> {
    let findings = validate_batch(batch);
    for finding in &findings {
        let line = format!("{}: {}", finding.code.as_str(), finding.message);
        if finding.is_error() {
            output.error(&line);
        } else {
            output.warning(&line);
        }
    }
    let errors = findings.iter().filter(|f| f.is_error()).count();
    if errors > 0 {
        return Err(CliError::Validation(format!(
            "batch plan has {errors} error{}",
            if errors == 1 { "" } else { "s" }
        )));
    }
    Ok(())
}

fn print_plan(output: &Output, batch: &Batch) {
    let meta = &batch.metadata;
    let formats: Vec<&str> = batch.config.formats.iter().map(|f| f.code()).collect();
    let strategy = match batch.strategy {
        ExecutionStrategy::Sequential => "sequential".to_owned(),
        ExecutionStrategy::Parallel { max_concurrency } => format!("parallel x{max_concurrency}"),
    };
    output.info(&format!(
        "Planned {} exports from {} files as {} ({strategy}), estimated {:.1}s",
        meta.expected_outputs,
        meta.total_files,
        formats.join(", "),
        meta.estimated_duration.as_secs_f64()
    ));
    output.detail(&format!("Output directory: {}", batch.config.output_dir.display()));
}

fn print_dry_run(output: &Output, batch: &Batch) {
    output.highlight("\n[DRY RUN] Nothing rendered.");
    for job in &batch.jobs {
        output.info(&format!(
            "  {} #{} -> {}",
            job.source_relative_path.display(),
            job.diagram.index + 1,
            job.output_path.display()
        ));
    }
}

/// Render the batch, showing progress and cancelling on Ctrl-C.
async fn run_batch(
    config: &Config,
    batch: &Batch,
    tracker: &ProgressTracker,
    reporter: &ProgressReporter,
) -> Result<BatchResult, CliError> {
    let (kroki, cli) = renderers(config)?;
    let renderer = AnyRenderer::select(config.renderer.backend, kroki, cli).await;
    tracing::info!(renderer = renderer.name(), "Renderer selected");

    let supervisor = TimeoutSupervisor::new(config.timeouts.policy(), config.timeouts.cooldown())?;
    let coordinator = ExportCoordinator::new(renderer, supervisor.clone());

    let mut events = tracker.subscribe();
    let printer = tokio::spawn(async move {
        let output = Output::new();
        loop {
            match events.recv().await {
                Ok(event) if !event.message.is_empty() => output.progress(&format!(
                    "[{}/{}] {}",
                    event.completed_jobs, event.total_jobs, event.message
                )),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    let interrupt = {
        let tracker = tracker.clone();
        let batch_id = batch.id;
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracker.cancel(batch_id);
                let stopped = supervisor.emergency_cleanup();
                tracing::warn!(%batch_id, stopped, "Interrupted, cancelling export");
            }
        })
    };

    let result = coordinator.execute_batch(batch, reporter).await;

    interrupt.abort();
    printer.abort();
    tracker.cleanup(batch.id);
    Ok(result)
}

fn print_result(output: &Output, result: &BatchResult) {
    let summary = &result.summary;
    output.separator();
    if result.is_success() {
        output.success(&format!(
            "Exported {} of {} diagrams in {:.1}s",
            summary.successful,
            summary.total,
            summary.total_duration.as_secs_f64()
        ));
    } else {
        output.warning(&format!(
            "{} succeeded, {} failed, {} cancelled of {} in {:.1}s",
            summary.successful,
            summary.failed,
            summary.cancelled,
            summary.total,
            summary.total_duration.as_secs_f64()
        ));
    }
    if summary.skipped > 0 {
        output.detail(&format!("{} existing outputs kept", summary.skipped));
    }
    for (format, paths) in &result.outputs {
        output.detail(&format!("{}: {} files", format.code(), paths.len()));
    }

    for error in &result.errors {
        let source = result
            .job(&error.job_id)
            .map(|job| job.source_path.display().to_string())
            .unwrap_or_default();
        output.error(&format!("{} {source}: {}", error.code.as_str(), error.message));
        for hint in &error.recovery_hints {
            output.detail(&format!("    hint: {hint}"));
        }
    }
}

fn write_summary(path: &Path, result: &BatchResult) -> Result<(), CliError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(result)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: ExportArgs,
    }

    #[test]
    fn test_parses_repeated_formats_and_policies() {
        let harness = Harness::try_parse_from([
            "export", "docs", "-f", "svg", "--format", "jpeg", "--overwrite", "skip",
            "--naming", "descriptive", "--theme", "dark", "--sequential",
        ])
        .unwrap();
        let args = harness.args;
        assert_eq!(args.dir, Some(PathBuf::from("docs")));
        assert_eq!(args.formats, vec![ExportFormat::Svg, ExportFormat::Jpg]);
        assert_eq!(args.overwrite, Some(OverwritePolicy::Skip));
        assert_eq!(args.naming, Some(NamingStrategy::Descriptive));
        assert_eq!(args.theme, Some(Theme::Dark));
        assert!(args.sequential);
        assert!(!args.dry_run);
    }

    #[test]
    fn test_rejects_unknown_format() {
        assert!(Harness::try_parse_from(["export", "-f", "gif"]).is_err());
    }

    #[test]
    fn test_planning_reuses_the_reporter_batch_id() {
        let temp = tempfile::tempdir().unwrap();
        for name in ["a.mmd", "b.mmd"] {
            std::fs::write(temp.path().join(name), "graph TD\n  A --> B\n").unwrap();
        }
        let sources = diagex_scan::Scanner::new().scan(temp.path(), &Default::default());
        let tracker = ProgressTracker::new();
        let reporter = tracker.create_reporter(Uuid::new_v4());
        assert_eq!(tracker.get_progress(reporter.batch_id()).unwrap().phase, Phase::Discovery);

        let config = BatchExportConfig::new([ExportFormat::Svg, ExportFormat::Png], temp.path().join("out"));
        let batch = plan_batch(&reporter, &sources, &config, true).unwrap();

        assert_eq!(batch.id, reporter.batch_id());
        assert_eq!(batch.jobs.len(), 4);
        assert_eq!(batch.strategy, ExecutionStrategy::Sequential);
        let state = tracker.get_progress(batch.id).unwrap();
        assert_eq!(state.phase, Phase::Planning);
        assert_eq!(state.total_jobs, 4);
        assert_eq!(state.completed_jobs, 0);
    }

    #[test]
    fn test_summary_written_with_parent_dirs() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("reports/summary.json");
        let result = BatchResult::new(Default::default(), Vec::new(), std::time::Duration::ZERO, false);

        write_summary(&path, &result).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["summary"]["total"], 0);
        assert_eq!(json["cancelled"], false);
    }
}
