//! Batch export for diagex.
//!
//! Turns scanned [`DiagramSource`](diagex_scan::DiagramSource)s into a
//! [`Batch`] of export jobs ([`create_batch`]), checks the plan
//! ([`validate_batch`]) and runs it with an [`ExportCoordinator`], which
//! reports through a [`ProgressReporter`] and returns a [`BatchResult`].
//!
//! # Example
//!
//! ```no_run
//! use diagex_batch::{BatchExportConfig, ExportCoordinator, ProgressTracker, create_batch};
//! use diagex_render::{ExportFormat, KrokiRenderer};
//! use diagex_scan::{ScanOptions, Scanner};
//! use diagex_supervisor::TimeoutSupervisor;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let sources = Scanner::new().scan("docs".as_ref(), &ScanOptions::default());
//! let config = BatchExportConfig::new([ExportFormat::Svg], "diagrams");
//! let batch = create_batch(&sources, &config)?;
//!
//! let tracker = ProgressTracker::new();
//! let reporter = tracker.create_reporter(batch.id);
//! let coordinator = ExportCoordinator::new(KrokiRenderer::default(), TimeoutSupervisor::default());
//! let result = coordinator.execute_batch(&batch, &reporter).await;
//! println!("{} of {} exported", result.summary.successful, result.summary.total);
//! # Ok(())
//! # }
//! ```

mod config;
mod coordinator;
mod error;
mod job;
mod planner;
mod progress;
mod result;

#[cfg(test)]
mod testing;

pub use config::{
    BatchExportConfig, DEFAULT_MAX_CONCURRENCY, MAX_CONCURRENCY, MAX_DIMENSION, NamingStrategy,
    OverwritePolicy, RetryPolicy,
};
pub use coordinator::{ExportCoordinator, optimize_job_order};
pub use error::{BatchError, ConfigValidationError, PolicyParseError};
pub use job::{Batch, BatchMetadata, ExecutionStrategy, ExportJob};
pub use planner::{
    PARALLEL_THRESHOLD, ValidationCode, ValidationError, create_batch, estimate_duration,
    validate_batch,
};
pub use progress::{
    CANCELLED_MESSAGE, Phase, ProgressEvent, ProgressReporter, ProgressState, ProgressTracker,
};
pub use result::{
    BatchResult, BatchSummary, ErrorCode, JobError, JobResult, JobStatus, Severity,
};
