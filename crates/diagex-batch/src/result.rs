//! Job and batch outcomes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use diagex_render::ExportFormat;
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::job::ExportJob;

/// How serious a finding or error is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// Terminal state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Failed,
    Cancelled,
}

/// Machine-readable failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RendererUnavailable,
    UnsupportedFormat,
    RenderFailed,
    Timeout,
    WriteFailed,
    DependencyFailed,
    TaskFailed,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RendererUnavailable => "RENDERER_UNAVAILABLE",
            Self::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            Self::RenderFailed => "RENDER_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::WriteFailed => "WRITE_FAILED",
            Self::DependencyFailed => "DEPENDENCY_FAILED",
            Self::TaskFailed => "TASK_FAILED",
        }
    }
}

/// Why a job failed, with hints for fixing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobError {
    pub job_id: String,
    pub code: ErrorCode,
    pub message: String,
    pub severity: Severity,
    /// Whether the failure class is retried by the coordinator.
    pub retryable: bool,
    pub recovery_hints: Vec<String>,
}

impl JobError {
    pub(crate) fn new(job: &ExportJob, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            job_id: job.id.clone(),
            code,
            message: message.into(),
            severity: Severity::Error,
            retryable: false,
            recovery_hints: Vec::new(),
        }
    }

    pub(crate) fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub(crate) fn with_hints(mut self, hints: impl IntoIterator<Item = String>) -> Self {
        self.recovery_hints.extend(hints);
        self
    }
}

/// Outcome of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobResult {
    pub job_id: String,
    pub source_path: PathBuf,
    pub format: ExportFormat,
    pub status: JobStatus,
    /// Render attempts made; 0 when the job never rendered.
    pub attempts: u32,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    /// File written (or kept, when skipped).
    pub output_path: Option<PathBuf>,
    /// Bytes written.
    pub bytes: u64,
    /// The output existed and the overwrite policy kept it.
    pub skipped: bool,
    pub error: Option<JobError>,
}

impl JobResult {
    fn base(job: &ExportJob, status: JobStatus, attempts: u32, duration: Duration) -> Self {
        Self {
            job_id: job.id.clone(),
            source_path: job.source_path.clone(),
            format: job.format,
            status,
            attempts,
            duration,
            output_path: None,
            bytes: 0,
            skipped: false,
            error: None,
        }
    }

    pub(crate) fn success(
        job: &ExportJob,
        attempts: u32,
        duration: Duration,
        output_path: PathBuf,
        bytes: u64,
    ) -> Self {
        Self {
            output_path: Some(output_path),
            bytes,
            ..Self::base(job, JobStatus::Success, attempts, duration)
        }
    }

    pub(crate) fn skipped(job: &ExportJob, duration: Duration) -> Self {
        Self {
            output_path: Some(job.output_path.clone()),
            skipped: true,
            ..Self::base(job, JobStatus::Success, 0, duration)
        }
    }

    pub(crate) fn failed(job: &ExportJob, attempts: u32, duration: Duration, error: JobError) -> Self {
        Self {
            error: Some(error),
            ..Self::base(job, JobStatus::Failed, attempts, duration)
        }
    }

    pub(crate) fn cancelled(job: &ExportJob, attempts: u32, duration: Duration) -> Self {
        Self::base(job, JobStatus::Cancelled, attempts, duration)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}

/// Aggregate counters of a batch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    /// Includes skipped jobs.
    pub successful: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub skipped: usize,
    #[serde(rename = "total_duration_ms", serialize_with = "as_millis")]
    pub total_duration: Duration,
    pub total_output_bytes: u64,
    /// Finished jobs per second.
    pub throughput: f64,
}

/// Outcome of a whole batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub batch_id: Uuid,
    pub jobs: Vec<JobResult>,
    pub summary: BatchSummary,
    /// Written files grouped by format.
    pub outputs: BTreeMap<ExportFormat, Vec<PathBuf>>,
    pub errors: Vec<JobError>,
    pub cancelled: bool,
}

impl BatchResult {
    /// Aggregate job results.
    #[must_use]
    pub fn new(batch_id: Uuid, jobs: Vec<JobResult>, total_duration: Duration, cancelled: bool) -> Self {
        let count = |status| jobs.iter().filter(|job| job.status == status).count();
        let successful = count(JobStatus::Success);
        let failed = count(JobStatus::Failed);
        let cancelled_jobs = count(JobStatus::Cancelled);
        let skipped = jobs.iter().filter(|job| job.skipped).count();
        let total_output_bytes = jobs.iter().map(|job| job.bytes).sum();

        let secs = total_duration.as_secs_f64();
        #[allow(clippy::cast_precision_loss)]
        let throughput = if secs > 0.0 {
            (successful + failed) as f64 / secs
        } else {
            0.0
        };

        let mut outputs: BTreeMap<ExportFormat, Vec<PathBuf>> = BTreeMap::new();
        for job in jobs.iter().filter(|job| job.is_success() && !job.skipped) {
            if let Some(path) = &job.output_path {
                outputs.entry(job.format).or_default().push(path.clone());
            }
        }

        let errors = jobs.iter().filter_map(|job| job.error.clone()).collect();

        Self {
            batch_id,
            summary: BatchSummary {
                total: jobs.len(),
                successful,
                failed,
                cancelled: cancelled_jobs,
                skipped,
                total_duration,
                total_output_bytes,
                throughput,
            },
            jobs,
            outputs,
            errors,
            cancelled,
        }
    }

    #[must_use]
    pub fn job(&self, id: &str) -> Option<&JobResult> {
        self.jobs.iter().find(|job| job.job_id == id)
    }

    /// Whether every job succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.summary.successful == self.summary.total
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::job;

    #[test]
    fn test_summary_counts_and_outputs() {
        let svg = job("job-1", ExportFormat::Svg);
        let png = job("job-2", ExportFormat::Png);
        let skipped = job("job-3", ExportFormat::Svg);
        let failed = job("job-4", ExportFormat::Pdf);
        let cancelled = job("job-5", ExportFormat::Svg);

        let result = BatchResult::new(
            Uuid::nil(),
            vec![
                JobResult::success(&svg, 1, Duration::from_millis(100), "out/a.svg".into(), 300),
                JobResult::success(&png, 2, Duration::from_millis(100), "out/a.png".into(), 700),
                JobResult::skipped(&skipped, Duration::ZERO),
                JobResult::failed(
                    &failed,
                    3,
                    Duration::from_millis(50),
                    JobError::new(&failed, ErrorCode::RenderFailed, "boom").retryable(true),
                ),
                JobResult::cancelled(&cancelled, 0, Duration::ZERO),
            ],
            Duration::from_secs(2),
            true,
        );

        let summary = &result.summary;
        assert_eq!(summary.total, 5);
        assert_eq!(summary.successful, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total_output_bytes, 1_000);
        assert!((summary.throughput - 2.0).abs() < f64::EPSILON);

        assert_eq!(result.outputs[&ExportFormat::Svg], vec![PathBuf::from("out/a.svg")]);
        assert_eq!(result.outputs[&ExportFormat::Png], vec![PathBuf::from("out/a.png")]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].job_id, "job-4");
        assert!(!result.is_success());
    }

    #[test]
    fn test_serializes_codes_and_millis() {
        let failed = job("job-1", ExportFormat::Svg);
        let result = BatchResult::new(
            Uuid::nil(),
            vec![JobResult::failed(
                &failed,
                1,
                Duration::from_millis(1_500),
                JobError::new(&failed, ErrorCode::DependencyFailed, "dependency job-0 failed"),
            )],
            Duration::from_millis(1_500),
            false,
        );

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["jobs"][0]["duration_ms"], 1_500);
        assert_eq!(json["jobs"][0]["status"], "failed");
        assert_eq!(json["errors"][0]["code"], "DEPENDENCY_FAILED");
        assert_eq!(json["errors"][0]["severity"], "error");
        assert_eq!(json["summary"]["total_duration_ms"], 1_500);
    }
}
