//! Diagram sources and the diagrams extracted from them.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::classify::{classify, complexity};
use crate::fence::fenced_blocks;
use crate::language::DiagramType;

/// How a file carries diagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// The whole file is one diagram (`.mmd`, `.mermaid`).
    SingleDiagram,
    /// Diagrams live in fenced blocks (`.md`, `.markdown`).
    MultiDiagram,
}

impl SourceKind {
    /// Determine the kind from a file extension (case-insensitive).
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "mmd" | "mermaid" => Some(Self::SingleDiagram),
            "md" | "markdown" => Some(Self::MultiDiagram),
            _ => None,
        }
    }
}

/// Complexity bucket of a diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityCategory {
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

impl ComplexityCategory {
    /// Bucket a complexity score.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score <= 3.0 {
            Self::Simple
        } else if score <= 8.0 {
            Self::Moderate
        } else if score <= 15.0 {
            Self::Complex
        } else {
            Self::VeryComplex
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
            Self::VeryComplex => "very_complex",
        }
    }
}

/// Structural complexity of a diagram body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Complexity {
    pub node_count: usize,
    pub connection_count: usize,
    /// Maximum block nesting depth.
    pub depth: usize,
    /// Weighted combination of the counts above.
    pub score: f64,
    pub category: ComplexityCategory,
    /// Expected time for one render of this diagram.
    pub estimated_render_time: Duration,
}

/// One extracted diagram body with its classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagram {
    /// Identifier, stable within its source (`d0`, `d1`, ...).
    pub id: String,
    /// Zero-based position among the diagrams of its source.
    pub index: usize,
    /// Diagram text, indentation preserved.
    pub content: String,
    /// 1-based line of the first body line in the source file.
    pub start_line: usize,
    /// 1-based line of the last body line in the source file.
    pub end_line: usize,
    pub diagram_type: DiagramType,
    /// Classification confidence in `0.0..=1.0`.
    pub confidence: f32,
    pub complexity: Complexity,
}

impl Diagram {
    /// Classify and score a diagram body.
    #[must_use]
    pub fn new(index: usize, content: String, start_line: usize, end_line: usize) -> Self {
        let (diagram_type, confidence) = classify(&content);
        let complexity = complexity(&content);
        Self {
            id: format!("d{index}"),
            index,
            content,
            start_line,
            end_line,
            diagram_type,
            confidence,
            complexity,
        }
    }
}

/// A file contributing one or more diagrams.
#[derive(Debug, Clone, Serialize)]
pub struct DiagramSource {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Path relative to the scan root.
    pub relative_path: PathBuf,
    pub kind: SourceKind,
    /// File size in bytes.
    pub size: u64,
    pub modified: SystemTime,
    /// Diagrams in document order.
    pub diagrams: Vec<Diagram>,
}

impl DiagramSource {
    /// File name without its extension, used to derive output names.
    #[must_use]
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "diagram".to_owned())
    }
}

/// Extract the diagrams of a file body according to its kind.
pub(crate) fn extract_diagrams(content: &str, kind: SourceKind) -> Vec<Diagram> {
    match kind {
        SourceKind::SingleDiagram => {
            if content.trim().is_empty() {
                return Vec::new();
            }
            let line_count = content.lines().count().max(1);
            vec![Diagram::new(0, content.to_owned(), 1, line_count)]
        }
        SourceKind::MultiDiagram => fenced_blocks(content)
            .into_iter()
            .filter(|block| block.language.eq_ignore_ascii_case("mermaid"))
            .filter(|block| !block.body.trim().is_empty())
            .enumerate()
            .map(|(index, block)| Diagram::new(index, block.body, block.start_line, block.end_line))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(SourceKind::from_path(Path::new("a.mmd")), Some(SourceKind::SingleDiagram));
        assert_eq!(SourceKind::from_path(Path::new("a.MERMAID")), Some(SourceKind::SingleDiagram));
        assert_eq!(SourceKind::from_path(Path::new("a.md")), Some(SourceKind::MultiDiagram));
        assert_eq!(SourceKind::from_path(Path::new("a.markdown")), Some(SourceKind::MultiDiagram));
        assert_eq!(SourceKind::from_path(Path::new("a.txt")), None);
        assert_eq!(SourceKind::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn test_single_diagram_spans_whole_file() {
        let diagrams = extract_diagrams("graph TD\n  A --> B\n", SourceKind::SingleDiagram);
        assert_eq!(diagrams.len(), 1);
        assert_eq!(diagrams[0].id, "d0");
        assert_eq!((diagrams[0].start_line, diagrams[0].end_line), (1, 2));
        assert_eq!(diagrams[0].diagram_type, DiagramType::Flowchart);
    }

    #[test]
    fn test_blank_single_diagram_file_yields_nothing() {
        assert!(extract_diagrams("  \n\n", SourceKind::SingleDiagram).is_empty());
    }

    #[test]
    fn test_container_keeps_only_non_empty_mermaid_blocks() {
        let doc = "\
# Doc
```mermaid
sequenceDiagram
  A->>B: hi
```
```mermaid

```
```rust
fn main() {}
```
```Mermaid
pie
  \"a\" : 1
```
";
        let diagrams = extract_diagrams(doc, SourceKind::MultiDiagram);

        assert_eq!(diagrams.len(), 2);
        assert_eq!(diagrams[0].index, 0);
        assert_eq!(diagrams[0].diagram_type, DiagramType::Sequence);
        assert_eq!(diagrams[1].index, 1);
        assert_eq!(diagrams[1].id, "d1");
        assert_eq!(diagrams[1].diagram_type, DiagramType::Pie);
        assert_eq!(diagrams[1].start_line, 13);
    }

    #[test]
    fn test_unknown_diagram_type_is_still_extracted() {
        let diagrams = extract_diagrams("```mermaid\nnot a diagram\n```", SourceKind::MultiDiagram);
        assert_eq!(diagrams.len(), 1);
        assert_eq!(diagrams[0].diagram_type, DiagramType::Unknown);
        assert_eq!(diagrams[0].confidence, 0.0);
    }
}
