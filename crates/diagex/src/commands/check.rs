//! `diagex check` command implementation.
//!
//! Probes both rendering backends under the `debug` deadlines and reports
//! which one an export would use.

use std::path::PathBuf;

use clap::Args;
use diagex_config::{CliSettings, Config};
use diagex_render::{AnyRenderer, Backend, Renderer};
use diagex_supervisor::{Deadlines, OperationCallbacks, OperationCategory, TimeoutSupervisor};

use super::renderers;
use crate::error::CliError;
use crate::output::Output;

/// Arguments for the check command.
#[derive(Args)]
pub(crate) struct CheckArgs {
    /// Path to configuration file (default: auto-discover diagex.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Rendering backend (auto, kroki, cli).
    #[arg(long)]
    backend: Option<Backend>,

    /// Kroki server URL (overrides config).
    #[arg(long)]
    kroki_url: Option<String>,
}

impl CheckArgs {
    /// Execute the check command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid or no renderer is usable.
    pub(crate) async fn execute(self) -> Result<(), CliError> {
        let output = Output::new();

        let cli_settings = CliSettings {
            backend: self.backend,
            kroki_url: self.kroki_url,
            ..Default::default()
        };
        let config = Config::load(self.config.as_deref(), Some(&cli_settings))?;
        if let Some(path) = &config.config_path {
            output.detail(&format!("Config: {}", path.display()));
        }

        let supervisor =
            TimeoutSupervisor::new(config.timeouts.policy(), config.timeouts.cooldown())?;
        let (kroki, cli) = renderers(&config)?;

        output.highlight(&format!("Backend preference: {}", config.renderer.backend.as_str()));

        let kroki_label = format!("Kroki ({})", kroki.server_url());
        report(&output, &supervisor, &kroki_label, &kroki).await;
        let cli_label = format!("Mermaid CLI ({})", cli.command_line());
        report(&output, &supervisor, &cli_label, &cli).await;

        let selected = AnyRenderer::select(config.renderer.backend, kroki, cli).await;
        let available = probe(&supervisor, &selected).await;

        output.info("");
        print_deadlines(&output, "export", &config.timeouts.policy().export);
        print_deadlines(&output, "batch_export", &config.timeouts.policy().batch_export);
        output.detail(&format!(
            "Export cooldown: {} ms",
            config.timeouts.cooldown().as_millis()
        ));

        if available {
            output.success(&format!("Exports will use {}", selected.name()));
            Ok(())
        } else {
            Err(CliError::Validation(format!(
                "selected renderer {} is not available",
                selected.name()
            )))
        }
    }
}

/// Availability probe bounded by the `debug` deadlines.
async fn probe<R: Renderer>(supervisor: &TimeoutSupervisor, renderer: &R) -> bool {
    let callbacks = OperationCallbacks::new().on_soft(|op| {
        tracing::info!(name = %op.name, "Renderer probe is slow");
    });
    supervisor
        .supervise(
            format!("probe {}", renderer.name()),
            OperationCategory::Debug,
            callbacks,
            renderer.is_available(),
        )
        .await
        .unwrap_or(false)
}

async fn report<R: Renderer>(
    output: &Output,
    supervisor: &TimeoutSupervisor,
    label: &str,
    renderer: &R,
) {
    if probe(supervisor, renderer).await {
        output.success(&format!("  {label}: available"));
    } else {
        output.warning(&format!("  {label}: not available"));
        for dependency in renderer.required_dependencies() {
            output.detail(&format!("    requires: {dependency}"));
        }
    }
}

fn print_deadlines(output: &Output, category: &str, deadlines: &Deadlines) {
    output.detail(&format!(
        "Deadlines ({category}): warn {}s, prompt {}s, cancel {}s",
        deadlines.soft.as_secs(),
        deadlines.medium.as_secs(),
        deadlines.hard.as_secs()
    ));
}
