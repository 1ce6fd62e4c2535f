//! `diagex scan` command implementation.

use std::path::{Path, PathBuf};

use clap::Args;
use console::Term;
use diagex_config::{CliSettings, Config};
use diagex_scan::{DiagramSource, ScanOutcome, ScanStats, Scanner};
use serde::Serialize;

use super::open_cache;
use crate::error::CliError;
use crate::output::Output;

/// Arguments for the scan command.
#[derive(Args)]
pub(crate) struct ScanArgs {
    /// Directory to scan (overrides config).
    dir: Option<PathBuf>,

    /// Path to configuration file (default: auto-discover diagex.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory levels to descend into (overrides config).
    #[arg(long)]
    max_depth: Option<usize>,

    /// Print the result as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable the analysis cache.
    #[arg(long)]
    no_cache: bool,
}

#[derive(Serialize)]
struct ScanReport<'a> {
    root: &'a Path,
    sources: &'a [DiagramSource],
    stats: &'a ScanStats,
    total_diagrams: usize,
}

impl ScanArgs {
    /// Execute the scan command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid or the root is not a directory.
    pub(crate) fn execute(self, version: &str) -> Result<(), CliError> {
        let output = Output::new();

        let cli_settings = CliSettings {
            source_dir: self.dir,
            max_depth: self.max_depth,
            cache_enabled: self.no_cache.then_some(false),
            ..Default::default()
        };
        let config = Config::load(self.config.as_deref(), Some(&cli_settings))?;

        let root = &config.scan_resolved.source_dir;
        if !root.is_dir() {
            return Err(CliError::Validation(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let cache = open_cache(&config, version)?;
        let outcome = Scanner::with_cache(cache.as_ref())
            .scan_with_stats(root, &config.scan_resolved.options);

        if self.json {
            let report = ScanReport {
                root,
                sources: &outcome.sources,
                stats: &outcome.stats,
                total_diagrams: outcome.total_diagrams(),
            };
            let json = serde_json::to_string_pretty(&report)?;
            let _ = Term::stdout().write_line(&json);
        } else {
            print_outcome(&output, root, &outcome);
        }

        Ok(())
    }
}

fn print_outcome(output: &Output, root: &Path, outcome: &ScanOutcome) {
    output.highlight(&format!("Scanned {}", root.display()));

    for source in &outcome.sources {
        output.info(&format!(
            "\n{} ({} diagram{})",
            source.relative_path.display(),
            source.diagrams.len(),
            if source.diagrams.len() == 1 { "" } else { "s" }
        ));
        for diagram in &source.diagrams {
            let complexity = &diagram.complexity;
            output.info(&format!(
                "  {:>3}. {:<14} lines {}-{}  {} (score {:.1}, ~{:.1}s)",
                diagram.index + 1,
                diagram.diagram_type.as_str(),
                diagram.start_line,
                diagram.end_line,
                complexity.category.as_str(),
                complexity.score,
                complexity.estimated_render_time.as_secs_f64(),
            ));
        }
    }

    let stats = &outcome.stats;
    output.info("");
    output.success(&format!(
        "Found {} diagrams in {} files",
        outcome.total_diagrams(),
        outcome.sources.len()
    ));
    output.detail(&format!(
        "{} files visited, {} analyzed, {} from cache, {} directories skipped",
        stats.files_visited, stats.files_analyzed, stats.cache_hits, stats.directories_skipped
    ));
    if stats.read_errors > 0 {
        output.warning(&format!("{} files could not be read", stats.read_errors));
    }
}
