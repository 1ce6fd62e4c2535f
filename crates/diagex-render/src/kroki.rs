//! Rendering through a Kroki server.
//!
//! Diagrams are sent as `text/plain` POST bodies to `<server>/mermaid/<format>`.
//! Kroki renders Mermaid to SVG and PNG; JPG and WebP are converted from the
//! PNG response. PDF is not available from Kroki for Mermaid.

use std::time::Duration;

use ureq::Agent;

use crate::error::RenderError;
use crate::format::{ExportFormat, RenderOptions, Theme};
use crate::output::{finalize, source_format};
use crate::Renderer;

/// Public Kroki instance.
pub const DEFAULT_KROKI_URL: &str = "https://kroki.io";

/// Timeout for a single HTTP request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Create HTTP agent with the specified timeout.
///
/// Status codes are inspected by the caller so error bodies can be reported.
fn create_agent(timeout: Duration) -> Agent {
    Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build()
        .into()
}

/// Kroki HTTP backend.
#[derive(Clone)]
pub struct KrokiRenderer {
    server_url: String,
    agent: Agent,
    health_agent: Agent,
}

impl KrokiRenderer {
    /// Create a renderer for `server_url` with the default request timeout.
    #[must_use]
    pub fn new(server_url: impl Into<String>) -> Self {
        Self::with_timeout(server_url, DEFAULT_REQUEST_TIMEOUT)
    }

    #[must_use]
    pub fn with_timeout(server_url: impl Into<String>, timeout: Duration) -> Self {
        let server_url = server_url.into().trim_end_matches('/').to_owned();
        Self {
            server_url,
            agent: create_agent(timeout),
            health_agent: create_agent(HEALTH_TIMEOUT.min(timeout)),
        }
    }

    #[must_use]
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn endpoint(&self, format: ExportFormat) -> String {
        format!("{}/mermaid/{}", self.server_url, format.extension())
    }
}

impl Default for KrokiRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_KROKI_URL)
    }
}

/// Send a diagram to Kroki and return the response body.
///
/// Error responses are read for details.
fn send_diagram_request(
    agent: &Agent,
    url: &str,
    source: &str,
    theme: Theme,
) -> Result<Vec<u8>, RenderError> {
    let mut request = agent.post(url).header("Content-Type", "text/plain");
    if theme != Theme::Default {
        request = request.header("Kroki-Diagram-Options-theme", theme.as_str());
    }

    let response = request
        .send(source.as_bytes())
        .map_err(|e| RenderError::Http(e.to_string()))?;

    let status = response.status().as_u16();
    let mut body = response.into_body();

    if status >= 400 {
        let error_body = body
            .read_to_string()
            .unwrap_or_else(|_| String::from("(unable to read error body)"));
        return Err(RenderError::Http(format!("HTTP {status}: {}", error_body.trim())));
    }

    body.read_to_vec().map_err(|e| RenderError::Http(e.to_string()))
}

impl Renderer for KrokiRenderer {
    fn name(&self) -> &'static str {
        "kroki"
    }

    async fn is_available(&self) -> bool {
        let agent = self.health_agent.clone();
        let url = format!("{}/health", self.server_url);
        tokio::task::spawn_blocking(move || {
            agent
                .get(&url)
                .call()
                .is_ok_and(|response| response.status().is_success())
        })
        .await
        .unwrap_or(false)
    }

    async fn export(&self, source: &str, options: &RenderOptions) -> Result<Vec<u8>, RenderError> {
        let produced = source_format(options.format);
        if produced == ExportFormat::Pdf {
            return Err(RenderError::UnsupportedFormat {
                renderer: self.name(),
                format: options.format,
            });
        }
        if options.width.is_some() || options.height.is_some() {
            tracing::debug!("Kroki ignores requested dimensions");
        }

        let agent = self.agent.clone();
        let url = self.endpoint(produced);
        let source = source.to_owned();
        let theme = options.theme;

        let bytes = tokio::task::spawn_blocking(move || {
            send_diagram_request(&agent, &url, &source, theme)
        })
        .await
        .map_err(|e| RenderError::Http(format!("request task failed: {e}")))??;

        finalize(bytes, produced, options.format)
    }

    fn required_dependencies(&self) -> Vec<String> {
        vec![format!("Kroki server reachable at {}", self.server_url)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_uses_mermaid_path() {
        let renderer = KrokiRenderer::new("http://localhost:8000/");
        assert_eq!(renderer.server_url(), "http://localhost:8000");
        assert_eq!(renderer.endpoint(ExportFormat::Svg), "http://localhost:8000/mermaid/svg");
        assert_eq!(renderer.endpoint(ExportFormat::Png), "http://localhost:8000/mermaid/png");
    }

    #[tokio::test]
    async fn test_pdf_is_unsupported() {
        let renderer = KrokiRenderer::new("http://127.0.0.1:9");
        let err = renderer
            .export("graph TD", &RenderOptions::new(ExportFormat::Pdf))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::UnsupportedFormat { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let renderer = KrokiRenderer::with_timeout("http://127.0.0.1:9", Duration::from_secs(2));
        assert!(!renderer.is_available().await);
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_with_http_error() {
        let renderer = KrokiRenderer::with_timeout("http://127.0.0.1:9", Duration::from_secs(2));
        let err = renderer
            .export("graph TD", &RenderOptions::new(ExportFormat::Svg))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Http(_)));
        assert!(err.is_retryable());
    }
}
