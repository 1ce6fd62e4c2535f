//! Batch planning: expanding sources into jobs, checking the plan, and
//! estimating how long it will take.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use diagex_render::ExportFormat;
use diagex_scan::{ComplexityCategory, Diagram, DiagramSource};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{BatchExportConfig, NamingStrategy};
use crate::error::BatchError;
use crate::job::{Batch, BatchMetadata, ExecutionStrategy, ExportJob};
use crate::result::Severity;

/// Job count from which a batch runs in parallel (when concurrency allows).
pub const PARALLEL_THRESHOLD: usize = 4;

const BASE_PRIORITY: u32 = 100;

/// Time to write one output file.
const WRITE_OVERHEAD: Duration = Duration::from_millis(100);

/// Plan one job per (source, diagram, format).
///
/// The config is validated first; an invalid config produces no batch.
pub fn create_batch(
    sources: &[DiagramSource],
    config: &BatchExportConfig,
) -> Result<Batch, BatchError> {
    config.validate()?;

    let mut jobs = Vec::new();
    for source in sources {
        for diagram in &source.diagrams {
            for &format in &config.formats {
                jobs.push(ExportJob {
                    id: format!("job-{}", jobs.len() + 1),
                    source_path: source.path.clone(),
                    source_relative_path: source.relative_path.clone(),
                    diagram: diagram.clone(),
                    format,
                    output_path: output_path(source, diagram, format, config),
                    priority: priority(diagram, format),
                    dependencies: Vec::new(),
                    retry: config.retry.clone(),
                });
            }
        }
    }

    let strategy = if config.max_concurrency > 1 && jobs.len() >= PARALLEL_THRESHOLD {
        ExecutionStrategy::Parallel {
            max_concurrency: config.max_concurrency,
        }
    } else {
        ExecutionStrategy::Sequential
    };

    let mut batch = Batch {
        id: Uuid::new_v4(),
        config: config.clone(),
        metadata: BatchMetadata {
            total_files: sources.iter().filter(|s| !s.diagrams.is_empty()).count(),
            total_formats: config.formats.len(),
            expected_outputs: jobs.len(),
            created_at: Utc::now(),
            estimated_duration: Duration::ZERO,
        },
        jobs,
        strategy,
    };
    batch.metadata.estimated_duration = estimate_duration(&batch);

    tracing::info!(
        batch_id = %batch.id,
        jobs = batch.jobs.len(),
        files = batch.metadata.total_files,
        strategy = ?batch.strategy,
        "Batch planned"
    );

    Ok(batch)
}

/// `output_dir / [format/] / <relative parent> / <base>.<ext>`
fn output_path(
    source: &DiagramSource,
    diagram: &Diagram,
    format: ExportFormat,
    config: &BatchExportConfig,
) -> PathBuf {
    let mut path = config.output_dir.clone();
    if config.organize_by_format {
        path.push(format.extension());
    }
    if let Some(parent) = source.relative_path.parent()
        && !parent.as_os_str().is_empty()
    {
        path.push(parent);
    }
    path.push(format!(
        "{}.{}",
        base_name(source, diagram, config.naming),
        format.extension()
    ));
    path
}

fn base_name(source: &DiagramSource, diagram: &Diagram, naming: NamingStrategy) -> String {
    let stem = source.stem();
    if source.diagrams.len() == 1 {
        return stem;
    }
    let n = diagram.index + 1;
    match naming {
        NamingStrategy::Sequential => format!("{stem}-{n}"),
        NamingStrategy::Descriptive => format!("{stem}-{n}-{}", diagram.diagram_type),
    }
}

/// Higher for cheap jobs: simple diagrams and vector output go first.
fn priority(diagram: &Diagram, format: ExportFormat) -> u32 {
    let complexity_penalty = match diagram.complexity.category {
        ComplexityCategory::Simple => 0,
        ComplexityCategory::Moderate => 10,
        ComplexityCategory::Complex => 20,
        ComplexityCategory::VeryComplex => 30,
    };
    BASE_PRIORITY - complexity_penalty - format_cost(format)
}

fn format_cost(format: ExportFormat) -> u32 {
    match format {
        ExportFormat::Svg => 0,
        ExportFormat::Png | ExportFormat::Jpg | ExportFormat::Webp => 10,
        ExportFormat::Pdf => 20,
    }
}

fn format_factor(format: ExportFormat) -> f64 {
    match format {
        ExportFormat::Svg => 1.0,
        ExportFormat::Png | ExportFormat::Jpg | ExportFormat::Webp => 1.5,
        ExportFormat::Pdf => 2.0,
    }
}

/// Expected wall-clock time of a batch.
///
/// Sum of per-job estimates; a parallel strategy divides by its concurrency.
#[must_use]
pub fn estimate_duration(batch: &Batch) -> Duration {
    let total: Duration = batch
        .jobs
        .iter()
        .map(|job| {
            job.diagram
                .complexity
                .estimated_render_time
                .mul_f64(format_factor(job.format))
                + WRITE_OVERHEAD
        })
        .sum();

    match batch.strategy {
        ExecutionStrategy::Sequential => total,
        ExecutionStrategy::Parallel { .. } => {
            let lanes = u128::try_from(batch.strategy.concurrency()).unwrap_or(1);
            let nanos = total.as_nanos().div_ceil(lanes);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        }
    }
}

/// Kind of plan finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    EmptyFormats,
    InvalidOutputDir,
    CircularDependencies,
    UnknownDependency,
    DuplicateJobId,
    DuplicateOutputPath,
}

impl ValidationCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmptyFormats => "EMPTY_FORMATS",
            Self::InvalidOutputDir => "INVALID_OUTPUT_DIR",
            Self::CircularDependencies => "CIRCULAR_DEPENDENCIES",
            Self::UnknownDependency => "UNKNOWN_DEPENDENCY",
            Self::DuplicateJobId => "DUPLICATE_JOB_ID",
            Self::DuplicateOutputPath => "DUPLICATE_OUTPUT_PATH",
        }
    }
}

/// A problem found in a planned batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub code: ValidationCode,
    pub message: String,
    pub severity: Severity,
    /// Jobs involved, if any.
    pub job_ids: Vec<String>,
}

impl ValidationError {
    fn error(code: ValidationCode, message: String, job_ids: Vec<String>) -> Self {
        Self {
            code,
            message,
            severity: Severity::Error,
            job_ids,
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Check a planned batch. Findings are returned, never raised.
#[must_use]
pub fn validate_batch(batch: &Batch) -> Vec<ValidationError> {
    let mut findings = Vec::new();

    if batch.config.formats.is_empty() {
        findings.push(ValidationError::error(
            ValidationCode::EmptyFormats,
            "at least one output format is required".to_owned(),
            Vec::new(),
        ));
    }

    if let Some(reason) = output_dir_problem(&batch.config.output_dir) {
        findings.push(ValidationError::error(
            ValidationCode::InvalidOutputDir,
            format!("output directory {}: {reason}", batch.config.output_dir.display()),
            Vec::new(),
        ));
    }

    let mut seen = HashSet::new();
    for job in &batch.jobs {
        if !seen.insert(job.id.as_str()) {
            findings.push(ValidationError::error(
                ValidationCode::DuplicateJobId,
                format!("job id {} is used more than once", job.id),
                vec![job.id.clone()],
            ));
        }
    }

    for job in &batch.jobs {
        for dep in &job.dependencies {
            if !seen.contains(dep.as_str()) {
                findings.push(ValidationError::error(
                    ValidationCode::UnknownDependency,
                    format!("job {} depends on unknown job {dep}", job.id),
                    vec![job.id.clone(), dep.clone()],
                ));
            }
        }
    }

    for cycle in find_cycles(&batch.jobs) {
        findings.push(ValidationError::error(
            ValidationCode::CircularDependencies,
            format!("circular dependency: {}", cycle.join(" -> ")),
            cycle,
        ));
    }

    let mut by_output: HashMap<&Path, Vec<String>> = HashMap::new();
    for job in &batch.jobs {
        by_output
            .entry(job.output_path.as_path())
            .or_default()
            .push(job.id.clone());
    }
    let mut duplicates: Vec<(&Path, Vec<String>)> =
        by_output.into_iter().filter(|(_, ids)| ids.len() > 1).collect();
    duplicates.sort();
    for (path, job_ids) in duplicates {
        findings.push(ValidationError {
            code: ValidationCode::DuplicateOutputPath,
            message: format!("{} jobs write {}", job_ids.len(), path.display()),
            severity: Severity::Warning,
            job_ids,
        });
    }

    findings
}

/// Why `dir` can't receive output, if it can't.
fn output_dir_problem(dir: &Path) -> Option<String> {
    if let Ok(metadata) = fs::metadata(dir) {
        if !metadata.is_dir() {
            return Some("exists and is not a directory".to_owned());
        }
        if metadata.permissions().readonly() {
            return Some("is read-only".to_owned());
        }
        return None;
    }

    // Nearest existing ancestor must be a writable directory.
    let ancestor = dir
        .ancestors()
        .skip(1)
        .map(|p| if p.as_os_str().is_empty() { Path::new(".") } else { p })
        .find(|p| p.exists())?;
    match fs::metadata(ancestor) {
        Ok(metadata) if !metadata.is_dir() => Some(format!(
            "parent {} is not a directory",
            ancestor.display()
        )),
        Ok(metadata) if metadata.permissions().readonly() => {
            Some(format!("parent {} is read-only", ancestor.display()))
        }
        Ok(_) => None,
        Err(e) => Some(format!("cannot inspect {}: {e}", ancestor.display())),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Dependency cycles, each listed from its entry job around the loop.
fn find_cycles(jobs: &[ExportJob]) -> Vec<Vec<String>> {
    let index: HashMap<&str, usize> = jobs
        .iter()
        .enumerate()
        .map(|(i, job)| (job.id.as_str(), i))
        .collect();
    let mut marks = vec![Mark::Unvisited; jobs.len()];
    let mut cycles = Vec::new();

    for start in 0..jobs.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        marks[start] = Mark::InProgress;
        // (job, next dependency to visit)
        let mut stack = vec![(start, 0usize)];

        while let Some(top) = stack.last_mut() {
            let node = top.0;
            let deps = &jobs[node].dependencies;
            if top.1 >= deps.len() {
                marks[node] = Mark::Done;
                stack.pop();
                continue;
            }
            let dep = &deps[top.1];
            top.1 += 1;

            let Some(&child) = index.get(dep.as_str()) else {
                continue;
            };
            match marks[child] {
                Mark::Unvisited => {
                    marks[child] = Mark::InProgress;
                    stack.push((child, 0));
                }
                Mark::InProgress => {
                    let entry = stack.iter().position(|&(n, _)| n == child).unwrap_or(0);
                    cycles.push(stack[entry..].iter().map(|&(n, _)| jobs[n].id.clone()).collect());
                }
                Mark::Done => {}
            }
        }
    }

    cycles
}
