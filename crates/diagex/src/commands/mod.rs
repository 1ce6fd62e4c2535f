//! CLI command implementations.

pub(crate) mod check;
pub(crate) mod export;
pub(crate) mod scan;

pub(crate) use check::CheckArgs;
pub(crate) use export::ExportArgs;
pub(crate) use scan::ScanArgs;

use std::path::Path;

use diagex_cache::{Cache, FileCache, NullCache};
use diagex_config::Config;
use diagex_render::{CommandRenderer, KrokiRenderer};

use crate::error::CliError;

/// Scan cache for `config`, or a no-op cache when caching is disabled.
pub(crate) fn open_cache(config: &Config, version: &str) -> Result<Box<dyn Cache>, CliError> {
    if !config.cache_resolved.enabled {
        return Ok(Box::new(NullCache));
    }
    ensure_project_dir(&config.project_dir)?;
    Ok(Box::new(FileCache::new(config.cache_resolved.dir.clone(), version)))
}

/// Both configured backends, unprobed.
pub(crate) fn renderers(config: &Config) -> Result<(KrokiRenderer, CommandRenderer), CliError> {
    let kroki = KrokiRenderer::with_timeout(
        config.renderer.kroki_url.clone(),
        config.renderer.request_timeout(),
    );
    let cli = CommandRenderer::from_command_line(&config.renderer.command).ok_or_else(|| {
        CliError::Validation(format!(
            "renderer.command is not a valid command line: {:?}",
            config.renderer.command
        ))
    })?;
    Ok((kroki, cli))
}

/// Ensure the `.diagex/` project directory exists with a `.gitignore`.
pub(crate) fn ensure_project_dir(project_dir: &Path) -> Result<(), CliError> {
    std::fs::create_dir_all(project_dir)?;

    let gitignore_path = project_dir.join(".gitignore");
    if !gitignore_path.exists() {
        let _ = std::fs::write(&gitignore_path, "# Automatically created by diagex\n*\n");
    }

    Ok(())
}
