//! Diagram source discovery for diagex.
//!
//! This crate finds Mermaid diagrams in a file tree and describes each one:
//!
//! - [`Scanner`] walks a directory tree (iteratively, depth-bounded) and
//!   produces one [`DiagramSource`] per file that contains diagrams
//! - Single-diagram files (`.mmd`, `.mermaid`) contribute their whole body;
//!   Markdown files contribute every fenced ` ```mermaid ` block
//! - Every [`Diagram`] is classified ([`DiagramType`] + confidence) and scored
//!   for [`Complexity`], which drives render-time estimates downstream
//! - Per-file analysis is cached by path and mtime through `diagex-cache`
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use diagex_scan::{ScanOptions, Scanner};
//!
//! let scanner = Scanner::new();
//! let sources = scanner.scan(Path::new("docs"), &ScanOptions::default());
//! for source in &sources {
//!     println!("{}: {} diagram(s)", source.relative_path.display(), source.diagrams.len());
//! }
//! ```

mod classify;
mod error;
mod fence;
mod language;
mod scanner;
mod source;

pub use classify::{classify, complexity};
pub use error::ScanError;
pub use language::DiagramType;
pub use scanner::{DEFAULT_MAX_DEPTH, MAX_DEPTH_LIMIT, ScanOptions, ScanOutcome, ScanStats, Scanner};
pub use source::{Complexity, ComplexityCategory, Diagram, DiagramSource, SourceKind};
