//! Diagram type classification and complexity scoring.
//!
//! Both operate on the raw diagram body and are cheap enough to run for every
//! diagram in a large tree. Counts are structural heuristics, not a parse.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::language::{DiagramType, KEYWORDS};
use crate::source::{Complexity, ComplexityCategory};

/// Confidence when the first token equals the keyword.
const EXACT_CONFIDENCE: f32 = 1.0;
/// Confidence when the line only starts with the keyword (e.g. `graphTD`).
const PREFIX_CONFIDENCE: f32 = 0.7;

const NODE_WEIGHT: f64 = 0.25;
const CONNECTION_WEIGHT: f64 = 0.25;
const DEPTH_WEIGHT: f64 = 1.0;

/// An identifier immediately followed by a shape opener: `A[Label]`, `B(Round)`, `C{Choice}`, `D>Flag]`.
static NODE_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*[\[\(\{>]").expect("node label regex is valid")
});

/// Explicit participants in sequence diagrams.
static PARTICIPANT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:participant|actor)\s+\S").expect("participant regex is valid")
});

/// Arrow-like connectors, longest alternatives first (leftmost-first matching).
static CONNECTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"<-->|-\.->|==>|-->>|->>|-->|---|--[xo]|-[x)]|->|\.\.>|--\|>|\|\|--|\}[|o]--|\|o--|o--|\*--",
    )
    .expect("connector regex is valid")
});

/// Keywords that open a nested block closed by `end`.
const BLOCK_OPENERS: &[&str] = &[
    "subgraph", "loop", "alt", "opt", "par", "critical", "break", "rect", "box", "namespace",
];

/// Classify a diagram body by its first non-empty line.
///
/// Returns [`DiagramType::Unknown`] with confidence `0.0` when no keyword matches.
#[must_use]
pub fn classify(body: &str) -> (DiagramType, f32) {
    let Some(first_line) = body.lines().map(str::trim).find(|line| !line.is_empty()) else {
        return (DiagramType::Unknown, 0.0);
    };
    let first_token = first_line.split_whitespace().next().unwrap_or_default();

    KEYWORDS
        .iter()
        .find(|(keyword, _)| first_line.starts_with(keyword))
        .map_or((DiagramType::Unknown, 0.0), |(keyword, ty)| {
            let confidence = if first_token == *keyword {
                EXACT_CONFIDENCE
            } else {
                PREFIX_CONFIDENCE
            };
            (*ty, confidence)
        })
}

/// Score a diagram body's structural complexity.
#[must_use]
pub fn complexity(body: &str) -> Complexity {
    let node_count = NODE_LABEL.find_iter(body).count() + PARTICIPANT.find_iter(body).count();
    let connection_count = CONNECTOR.find_iter(body).count();
    let depth = nesting_depth(body);

    #[allow(clippy::cast_precision_loss)]
    let score = node_count as f64 * NODE_WEIGHT
        + connection_count as f64 * CONNECTION_WEIGHT
        + depth as f64 * DEPTH_WEIGHT;
    let category = ComplexityCategory::from_score(score);

    Complexity {
        node_count,
        connection_count,
        depth,
        score,
        category,
        estimated_render_time: estimate_render_time(score, category),
    }
}

/// Maximum nesting of `subgraph`/`loop`/`state X {` style blocks.
fn nesting_depth(body: &str) -> usize {
    let mut current: usize = 0;
    let mut max = 0;

    for line in body.lines().map(str::trim) {
        let first = line.split_whitespace().next().unwrap_or_default();
        if BLOCK_OPENERS.contains(&first) || (line.len() > 1 && line.ends_with('{')) {
            current += 1;
            max = max.max(current);
        } else if first == "end" || line == "}" {
            current = current.saturating_sub(1);
        }
    }

    max
}

/// Render-time estimate, strictly increasing across categories.
///
/// Each category has a base cost plus a bounded per-score component that never
/// reaches the next category's base.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn estimate_render_time(score: f64, category: ComplexityCategory) -> Duration {
    let (base_ms, per_point_ms, cap) = match category {
        ComplexityCategory::Simple => (500, 50.0, 3.0),
        ComplexityCategory::Moderate => (1_000, 50.0, 8.0),
        ComplexityCategory::Complex => (2_000, 50.0, 15.0),
        ComplexityCategory::VeryComplex => (4_000, 20.0, 100.0),
    };
    let variable_ms = (score.clamp(0.0, cap) * per_point_ms) as u64;
    Duration::from_millis(base_ms + variable_ms)
}
