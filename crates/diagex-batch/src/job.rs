//! Export jobs and batches.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use diagex_render::ExportFormat;
use diagex_scan::Diagram;
use uuid::Uuid;

use crate::config::{BatchExportConfig, RetryPolicy};

/// One diagram rendered to one format.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportJob {
    /// Unique within its batch (`job-<n>`).
    pub id: String,
    pub source_path: PathBuf,
    pub source_relative_path: PathBuf,
    pub diagram: Diagram,
    pub format: ExportFormat,
    pub output_path: PathBuf,
    /// Scheduling hint; higher runs earlier.
    pub priority: u32,
    /// Ids of jobs that must succeed before this one runs.
    pub dependencies: Vec<String>,
    pub retry: RetryPolicy,
}

/// How a batch's jobs are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// One job at a time, in optimized order.
    Sequential,
    /// Up to `max_concurrency` renders in flight.
    Parallel { max_concurrency: usize },
}

impl ExecutionStrategy {
    /// Number of jobs allowed in flight.
    #[must_use]
    pub fn concurrency(self) -> usize {
        match self {
            Self::Sequential => 1,
            Self::Parallel { max_concurrency } => max_concurrency.max(1),
        }
    }
}

/// Totals computed when a batch is planned.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchMetadata {
    /// Sources contributing at least one job.
    pub total_files: usize,
    pub total_formats: usize,
    pub expected_outputs: usize,
    pub created_at: DateTime<Utc>,
    pub estimated_duration: Duration,
}

/// A planned set of export jobs.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: Uuid,
    /// Snapshot of the configuration the batch was planned with.
    pub config: BatchExportConfig,
    pub jobs: Vec<ExportJob>,
    pub metadata: BatchMetadata,
    pub strategy: ExecutionStrategy,
}

impl Batch {
    /// Replace the execution strategy and refresh the duration estimate.
    #[must_use]
    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self.metadata.estimated_duration = crate::planner::estimate_duration(&self);
        self
    }

    /// Use an id allocated before planning, such as a progress reporter's.
    #[must_use]
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn job(&self, id: &str) -> Option<&ExportJob> {
        self.jobs.iter().find(|job| job.id == id)
    }
}
