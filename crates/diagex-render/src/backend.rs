//! Backend selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::command::CommandRenderer;
use crate::error::{ParseError, RenderError};
use crate::format::RenderOptions;
use crate::kroki::KrokiRenderer;
use crate::Renderer;

/// Configured backend preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Mermaid CLI when installed, otherwise Kroki.
    #[default]
    Auto,
    Kroki,
    Cli,
}

impl Backend {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Kroki => "kroki",
            Self::Cli => "cli",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "kroki" => Ok(Self::Kroki),
            "cli" | "mmdc" => Ok(Self::Cli),
            _ => Err(ParseError::Backend(s.to_owned())),
        }
    }
}

/// One of the concrete renderers, chosen at runtime.
#[derive(Clone)]
pub enum AnyRenderer {
    Kroki(KrokiRenderer),
    Command(CommandRenderer),
}

impl AnyRenderer {
    /// Resolve a backend preference to a renderer.
    ///
    /// `Auto` probes the CLI and falls back to Kroki.
    pub async fn select(backend: Backend, kroki: KrokiRenderer, cli: CommandRenderer) -> Self {
        match backend {
            Backend::Kroki => Self::Kroki(kroki),
            Backend::Cli => Self::Command(cli),
            Backend::Auto => {
                if cli.is_available().await {
                    Self::Command(cli)
                } else {
                    tracing::debug!(
                        command = %cli.command_line(),
                        server = kroki.server_url(),
                        "Mermaid CLI not available, using Kroki"
                    );
                    Self::Kroki(kroki)
                }
            }
        }
    }
}

impl Renderer for AnyRenderer {
    fn name(&self) -> &'static str {
        match self {
            Self::Kroki(r) => r.name(),
            Self::Command(r) => r.name(),
        }
    }

    async fn is_available(&self) -> bool {
        match self {
            Self::Kroki(r) => r.is_available().await,
            Self::Command(r) => r.is_available().await,
        }
    }

    async fn export(&self, source: &str, options: &RenderOptions) -> Result<Vec<u8>, RenderError> {
        match self {
            Self::Kroki(r) => r.export(source, options).await,
            Self::Command(r) => r.export(source, options).await,
        }
    }

    fn required_dependencies(&self) -> Vec<String> {
        match self {
            Self::Kroki(r) => r.required_dependencies(),
            Self::Command(r) => r.required_dependencies(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend() {
        assert_eq!("AUTO".parse::<Backend>().unwrap(), Backend::Auto);
        assert_eq!("mmdc".parse::<Backend>().unwrap(), Backend::Cli);
        assert!("phantomjs".parse::<Backend>().is_err());
    }

    #[tokio::test]
    async fn test_explicit_backends() {
        let kroki = KrokiRenderer::new("http://127.0.0.1:9");
        let cli = CommandRenderer::new("/nonexistent/diagex/mmdc");

        let selected = AnyRenderer::select(Backend::Cli, kroki.clone(), cli.clone()).await;
        assert_eq!(selected.name(), "mermaid-cli");

        let selected = AnyRenderer::select(Backend::Kroki, kroki, cli).await;
        assert_eq!(selected.name(), "kroki");
    }

    #[tokio::test]
    async fn test_auto_falls_back_to_kroki() {
        let selected = AnyRenderer::select(
            Backend::Auto,
            KrokiRenderer::new("http://127.0.0.1:9"),
            CommandRenderer::new("/nonexistent/diagex/mmdc"),
        )
        .await;
        assert_eq!(selected.name(), "kroki");
        assert!(selected.required_dependencies()[0].contains("127.0.0.1:9"));
    }
}
