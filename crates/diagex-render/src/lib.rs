//! Rendering backends for diagex.
//!
//! A [`Renderer`] turns Mermaid source into bytes of an [`ExportFormat`].
//! Two backends are provided:
//!
//! - [`KrokiRenderer`]: HTTP POST to a Kroki server
//! - [`CommandRenderer`]: the Mermaid CLI (`mmdc`) as a child process
//!
//! [`AnyRenderer`] picks one at runtime from a [`Backend`] preference.
//!
//! # Example
//!
//! ```no_run
//! use diagex_render::{ExportFormat, KrokiRenderer, RenderOptions, Renderer};
//!
//! # async fn run() -> Result<(), diagex_render::RenderError> {
//! let renderer = KrokiRenderer::default();
//! let svg = renderer
//!     .export("graph TD\n  A --> B", &RenderOptions::new(ExportFormat::Svg))
//!     .await?;
//! assert!(!svg.is_empty());
//! # Ok(())
//! # }
//! ```

use std::future::Future;

mod backend;
mod command;
mod error;
mod format;
mod kroki;
mod output;

pub use backend::{AnyRenderer, Backend};
pub use command::{CommandRenderer, DEFAULT_COMMAND};
pub use error::{ParseError, RenderError};
pub use format::{DEFAULT_BACKGROUND, ExportFormat, RenderOptions, Theme};
pub use kroki::{DEFAULT_KROKI_URL, DEFAULT_REQUEST_TIMEOUT, KrokiRenderer};

/// A diagram rendering capability.
///
/// Implementations must be safe to call concurrently; the batch coordinator
/// keeps several exports in flight.
pub trait Renderer: Send + Sync {
    /// Short identifier for logs and reports.
    fn name(&self) -> &'static str;

    /// Whether the backend can currently render.
    fn is_available(&self) -> impl Future<Output = bool> + Send;

    /// Render `source` to the format in `options`.
    fn export(
        &self,
        source: &str,
        options: &RenderOptions,
    ) -> impl Future<Output = Result<Vec<u8>, RenderError>> + Send;

    /// Human-readable prerequisites, shown when the backend is unavailable.
    fn required_dependencies(&self) -> Vec<String>;
}
