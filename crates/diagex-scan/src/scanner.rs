//! Diagram source discovery by filesystem walking.
//!
//! Discovery runs in two phases. The walk collects candidate files (cheap,
//! metadata only); analysis then reads and classifies candidates in parallel,
//! serving unchanged files from an analysis cache keyed by path and etag.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use diagex_cache::{Cache, CacheBucket, CacheBucketExt, MemoryCache};
use glob::{MatchOptions, Pattern};
use rayon::prelude::*;
use serde::Serialize;

use crate::error::ScanError;
use crate::source::{Diagram, DiagramSource, SourceKind, extract_diagrams};

/// Default directory depth below the scan root.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Largest accepted `max_depth`.
pub const MAX_DEPTH_LIMIT: usize = 64;

const ANALYSIS_BUCKET: &str = "analysis";

const DEFAULT_INCLUDE: &[&str] = &["**/*.md", "**/*.markdown", "**/*.mmd", "**/*.mermaid"];
const DEFAULT_EXCLUDED_DIRS: &[&str] = &["node_modules", "target", "dist", "build", "out", "vendor"];

/// Options controlling which files a scan considers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Directory levels below the root to descend into. `0` scans the root only.
    pub max_depth: usize,
    /// Glob patterns a file must match (relative path or file name).
    pub include_patterns: Vec<String>,
    /// Glob patterns that exclude a file (relative path or file name).
    pub exclude_patterns: Vec<String>,
    /// Directory names never descended into.
    pub exclude_directories: Vec<String>,
    /// Case sensitivity of pattern matching.
    pub case_sensitive: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            include_patterns: DEFAULT_INCLUDE.iter().map(|p| (*p).to_owned()).collect(),
            exclude_patterns: Vec::new(),
            exclude_directories: DEFAULT_EXCLUDED_DIRS
                .iter()
                .map(|d| (*d).to_owned())
                .collect(),
            case_sensitive: false,
        }
    }
}

impl ScanOptions {
    /// Check depth and that every pattern compiles.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::DepthTooLarge`] or [`ScanError::InvalidPattern`].
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.max_depth > MAX_DEPTH_LIMIT {
            return Err(ScanError::DepthTooLarge(self.max_depth));
        }
        for pattern in self.include_patterns.iter().chain(&self.exclude_patterns) {
            Pattern::new(pattern).map_err(|e| ScanError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.msg.to_owned(),
            })?;
        }
        Ok(())
    }

    fn match_options(&self) -> MatchOptions {
        MatchOptions {
            case_sensitive: self.case_sensitive,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        }
    }
}

/// Counters collected during a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    /// Regular files seen by the walk.
    pub files_visited: usize,
    /// Candidate files analysed (from disk or cache).
    pub files_analyzed: usize,
    /// Candidates served from the analysis cache.
    pub cache_hits: usize,
    /// Directories skipped as hidden or excluded.
    pub directories_skipped: usize,
    /// Directory listings or files that could not be read.
    pub read_errors: usize,
}

/// Result of [`Scanner::scan_with_stats`].
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// Sources with at least one diagram, sorted by relative path.
    pub sources: Vec<DiagramSource>,
    pub stats: ScanStats,
}

impl ScanOutcome {
    /// Number of diagrams across all sources.
    #[must_use]
    pub fn total_diagrams(&self) -> usize {
        self.sources.iter().map(|s| s.diagrams.len()).sum()
    }
}

struct Candidate {
    path: PathBuf,
    relative_path: PathBuf,
    kind: SourceKind,
}

enum Analysis {
    Found { source: DiagramSource, cached: bool },
    Empty { cached: bool },
    Unreadable,
}

/// Finds diagram sources below a root directory.
///
/// Analyses are cached per file. The default cache lives as long as the
/// scanner; use [`Scanner::with_cache`] to share or persist it.
pub struct Scanner {
    bucket: Box<dyn CacheBucket>,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    /// Create a scanner with a private in-memory analysis cache.
    #[must_use]
    pub fn new() -> Self {
        Self::with_cache(&MemoryCache::new())
    }

    /// Create a scanner storing analyses in the `analysis` bucket of `cache`.
    #[must_use]
    pub fn with_cache(cache: &dyn Cache) -> Self {
        Self {
            bucket: cache.bucket(ANALYSIS_BUCKET),
        }
    }

    /// Scan `root` and return diagram sources sorted by relative path.
    ///
    /// Returns an empty Vec if `root` doesn't exist.
    #[must_use]
    pub fn scan(&self, root: &Path, options: &ScanOptions) -> Vec<DiagramSource> {
        self.scan_with_stats(root, options).sources
    }

    /// Scan `root` and also report walk and cache counters.
    #[must_use]
    pub fn scan_with_stats(&self, root: &Path, options: &ScanOptions) -> ScanOutcome {
        let mut stats = ScanStats::default();

        if !root.is_dir() {
            tracing::debug!(root = %root.display(), "Scan root is not a directory");
            return ScanOutcome {
                sources: Vec::new(),
                stats,
            };
        }
        let root = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());

        let candidates = discover(&root, options, &mut stats);
        let analyses: Vec<Analysis> = candidates
            .into_par_iter()
            .map(|candidate| self.analyze(candidate))
            .collect();

        let mut sources = Vec::new();
        for analysis in analyses {
            match analysis {
                Analysis::Found { source, cached } => {
                    stats.files_analyzed += 1;
                    stats.cache_hits += usize::from(cached);
                    sources.push(source);
                }
                Analysis::Empty { cached } => {
                    stats.files_analyzed += 1;
                    stats.cache_hits += usize::from(cached);
                }
                Analysis::Unreadable => stats.read_errors += 1,
            }
        }
        sources.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        tracing::debug!(
            root = %root.display(),
            sources = sources.len(),
            files_analyzed = stats.files_analyzed,
            cache_hits = stats.cache_hits,
            "Scan complete"
        );

        ScanOutcome { sources, stats }
    }

    fn analyze(&self, candidate: Candidate) -> Analysis {
        let metadata = match fs::metadata(&candidate.path) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(path = %candidate.path.display(), error = %e, "Failed to stat file, skipping");
                return Analysis::Unreadable;
            }
        };
        let size = metadata.len();
        let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
        let etag = file_etag(modified, size);
        let key = candidate.path.to_string_lossy();

        let (diagrams, cached) = match self.bucket.get_json::<Vec<Diagram>>(&key, &etag) {
            Some(diagrams) => (diagrams, true),
            None => {
                let content = match fs::read_to_string(&candidate.path) {
                    Ok(content) => content,
                    Err(e) => {
                        tracing::warn!(path = %candidate.path.display(), error = %e, "Failed to read file, skipping");
                        return Analysis::Unreadable;
                    }
                };
                let diagrams = extract_diagrams(&content, candidate.kind);
                self.bucket.set_json(&key, &etag, &diagrams);
                (diagrams, false)
            }
        };

        if diagrams.is_empty() {
            return Analysis::Empty { cached };
        }
        Analysis::Found {
            source: DiagramSource {
                path: candidate.path,
                relative_path: candidate.relative_path,
                kind: candidate.kind,
                size,
                modified,
                diagrams,
            },
            cached,
        }
    }
}

/// Walk the tree breadth-first and collect candidate files.
fn discover(root: &Path, options: &ScanOptions, stats: &mut ScanStats) -> Vec<Candidate> {
    let include = compile_patterns(&options.include_patterns);
    let exclude = compile_patterns(&options.exclude_patterns);
    let match_options = options.match_options();

    let mut candidates = Vec::new();
    let mut queue = VecDeque::from([(root.to_path_buf(), 0usize)]);

    while let Some((dir, depth)) = queue.pop_front() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "Failed to read directory, skipping");
                stats.read_errors += 1;
                continue;
            }
        };

        for entry in entries.filter_map(Result::ok) {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();

            if file_type.is_dir() {
                if name.starts_with('.') || options.exclude_directories.contains(&name) {
                    stats.directories_skipped += 1;
                } else if depth < options.max_depth {
                    queue.push_back((path, depth + 1));
                }
                continue;
            }

            // Symlinked files count, symlinked directories are never followed.
            let is_file = file_type.is_file()
                || (file_type.is_symlink() && fs::metadata(&path).is_ok_and(|m| m.is_file()));
            if !is_file || name.starts_with('.') {
                continue;
            }
            stats.files_visited += 1;

            let Some(kind) = SourceKind::from_path(&path) else {
                continue;
            };
            let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            let relative = slash_path(&relative_path);

            let matches = |pattern: &Pattern| {
                pattern.matches_with(&relative, match_options)
                    || pattern.matches_with(&name, match_options)
            };
            if !include.iter().any(matches) || exclude.iter().any(matches) {
                continue;
            }

            candidates.push(Candidate {
                path,
                relative_path,
                kind,
            });
        }
    }

    candidates
}

/// Compile glob patterns, dropping (and logging) invalid ones.
fn compile_patterns(patterns: &[String]) -> Vec<Pattern> {
    patterns
        .iter()
        .filter_map(|pattern| match Pattern::new(pattern) {
            Ok(compiled) => Some(compiled),
            Err(e) => {
                tracing::warn!(pattern, error = %e, "Ignoring invalid glob pattern");
                None
            }
        })
        .collect()
}

/// Relative path with `/` separators, for pattern matching.
fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Cache etag: modification time in nanoseconds and size.
fn file_etag(modified: SystemTime, size: u64) -> String {
    let nanos = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{nanos}-{size}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ComplexityCategory, DiagramType};
    use diagex_cache::FileCache;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn relative_paths(sources: &[DiagramSource]) -> Vec<String> {
        sources.iter().map(|s| slash_path(&s.relative_path)).collect()
    }

    #[test]
    fn test_missing_root_returns_empty() {
        let scanner = Scanner::new();
        let sources = scanner.scan(Path::new("/nonexistent/diagex/root"), &ScanOptions::default());
        assert!(sources.is_empty());
    }

    #[test]
    fn test_finds_single_and_container_sources() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "guide.md",
            "# Guide\n\n```mermaid\ngraph TD\n  A --> B\n```\n\ntext\n\n```mermaid\nsequenceDiagram\n  A->>B: hi\n```\n",
        );
        write(temp.path(), "flow.mmd", "flowchart LR\n  X --> Y\n");
        write(temp.path(), "notes.txt", "graph TD\n  A --> B\n");

        let outcome = Scanner::new().scan_with_stats(temp.path(), &ScanOptions::default());

        assert_eq!(relative_paths(&outcome.sources), vec!["flow.mmd", "guide.md"]);
        assert_eq!(outcome.total_diagrams(), 3);

        let flow = &outcome.sources[0];
        assert_eq!(flow.kind, SourceKind::SingleDiagram);
        assert_eq!(flow.diagrams[0].diagram_type, DiagramType::Flowchart);
        assert!(flow.path.is_absolute());

        let guide = &outcome.sources[1];
        assert_eq!(guide.kind, SourceKind::MultiDiagram);
        assert_eq!(guide.diagrams[0].diagram_type, DiagramType::Flowchart);
        assert_eq!(guide.diagrams[1].diagram_type, DiagramType::Sequence);
        assert_eq!((guide.diagrams[0].start_line, guide.diagrams[0].end_line), (4, 5));
        assert_eq!(guide.diagrams[1].complexity.category, ComplexityCategory::Simple);

        assert_eq!(outcome.stats.files_visited, 3);
        assert_eq!(outcome.stats.files_analyzed, 2);
    }

    #[test]
    fn test_files_without_diagrams_are_not_reported() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "plain.md", "# Nothing here\n\n```rust\nfn main() {}\n```\n");
        write(temp.path(), "empty.mmd", "\n\n");

        let outcome = Scanner::new().scan_with_stats(temp.path(), &ScanOptions::default());
        assert!(outcome.sources.is_empty());
        assert_eq!(outcome.stats.files_analyzed, 2);
    }

    #[test]
    fn test_depth_limit() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "root.mmd", "pie\n");
        write(temp.path(), "a/one.mmd", "pie\n");
        write(temp.path(), "a/b/two.mmd", "pie\n");

        let scanner = Scanner::new();
        let options = |max_depth| ScanOptions {
            max_depth,
            ..ScanOptions::default()
        };

        assert_eq!(relative_paths(&scanner.scan(temp.path(), &options(0))), vec!["root.mmd"]);
        assert_eq!(
            relative_paths(&scanner.scan(temp.path(), &options(1))),
            vec!["a/one.mmd", "root.mmd"]
        );
        assert_eq!(scanner.scan(temp.path(), &options(2)).len(), 3);
    }

    #[test]
    fn test_skips_hidden_and_excluded_directories() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "docs/ok.mmd", "pie\n");
        write(temp.path(), ".git/hidden.mmd", "pie\n");
        write(temp.path(), "node_modules/pkg/dep.mmd", "pie\n");
        write(temp.path(), "docs/.draft.mmd", "pie\n");

        let outcome = Scanner::new().scan_with_stats(temp.path(), &ScanOptions::default());

        assert_eq!(relative_paths(&outcome.sources), vec!["docs/ok.mmd"]);
        assert_eq!(outcome.stats.directories_skipped, 2);
    }

    #[test]
    fn test_include_and_exclude_patterns() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "api/flow.mmd", "graph TD\n");
        write(temp.path(), "api/README.md", "```mermaid\npie\n```\n");
        write(temp.path(), "drafts/wip.mmd", "graph TD\n");

        let options = ScanOptions {
            include_patterns: vec!["**/*.mmd".to_owned()],
            exclude_patterns: vec!["drafts/**".to_owned()],
            ..ScanOptions::default()
        };
        let sources = Scanner::new().scan(temp.path(), &options);
        assert_eq!(relative_paths(&sources), vec!["api/flow.mmd"]);
    }

    #[test]
    fn test_pattern_case_sensitivity() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "Flow.MMD", "graph TD\n");

        let insensitive = ScanOptions {
            include_patterns: vec!["*.mmd".to_owned()],
            ..ScanOptions::default()
        };
        assert_eq!(Scanner::new().scan(temp.path(), &insensitive).len(), 1);

        let sensitive = ScanOptions {
            case_sensitive: true,
            ..insensitive
        };
        assert!(Scanner::new().scan(temp.path(), &sensitive).is_empty());
    }

    #[test]
    fn test_unchanged_files_served_from_cache() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.mmd", "graph TD\n  A --> B\n");
        write(temp.path(), "b.md", "```mermaid\npie\n```\n");

        let scanner = Scanner::new();
        let first = scanner.scan_with_stats(temp.path(), &ScanOptions::default());
        assert_eq!(first.stats.cache_hits, 0);

        let second = scanner.scan_with_stats(temp.path(), &ScanOptions::default());
        assert_eq!(second.stats.cache_hits, 2);
        assert_eq!(second.sources[0].diagrams, first.sources[0].diagrams);
    }

    #[test]
    fn test_modified_file_is_reanalysed() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.mmd", "graph TD\n");

        let scanner = Scanner::new();
        let first = scanner.scan(temp.path(), &ScanOptions::default());
        assert_eq!(first[0].diagrams[0].diagram_type, DiagramType::Flowchart);

        // Different size guarantees a new etag even with coarse mtimes.
        write(temp.path(), "a.mmd", "sequenceDiagram\n  A->>B: hi\n");
        let second = scanner.scan_with_stats(temp.path(), &ScanOptions::default());

        assert_eq!(second.stats.cache_hits, 0);
        assert_eq!(second.sources[0].diagrams[0].diagram_type, DiagramType::Sequence);
    }

    #[test]
    fn test_persistent_cache_survives_scanner() {
        let temp = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        write(temp.path(), "a.mmd", "graph TD\n");

        let cache = FileCache::new(cache_dir.path().to_path_buf(), "test");
        Scanner::with_cache(&cache).scan(temp.path(), &ScanOptions::default());

        let reopened = FileCache::new(cache_dir.path().to_path_buf(), "test");
        let outcome = Scanner::with_cache(&reopened).scan_with_stats(temp.path(), &ScanOptions::default());
        assert_eq!(outcome.stats.cache_hits, 1);
    }

    #[test]
    fn test_validate_options() {
        assert!(ScanOptions::default().validate().is_ok());

        let deep = ScanOptions {
            max_depth: MAX_DEPTH_LIMIT + 1,
            ..ScanOptions::default()
        };
        assert!(matches!(deep.validate(), Err(ScanError::DepthTooLarge(_))));

        let bad = ScanOptions {
            exclude_patterns: vec!["[unclosed".to_owned()],
            ..ScanOptions::default()
        };
        let err = bad.validate().unwrap_err();
        assert!(err.to_string().contains("[unclosed"));
    }

    #[test]
    fn test_invalid_pattern_is_ignored_during_scan() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.mmd", "pie\n");

        let options = ScanOptions {
            exclude_patterns: vec!["[unclosed".to_owned()],
            ..ScanOptions::default()
        };
        assert_eq!(Scanner::new().scan(temp.path(), &options).len(), 1);
    }
}
