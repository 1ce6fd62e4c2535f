//! Batch execution: ordering, dependency gating, retries and cancellation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use diagex_render::{RenderError, RenderOptions, Renderer};
use diagex_supervisor::{
    CancelReason, OperationCallbacks, OperationCategory, SupervisionError, TimeoutSupervisor,
};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::config::OverwritePolicy;
use crate::job::{Batch, ExportJob};
use crate::progress::{Phase, ProgressReporter};
use crate::result::{BatchResult, ErrorCode, JobError, JobResult, JobStatus};

/// Jobs sorted by descending priority; ties keep their input order.
#[must_use]
pub fn optimize_job_order(jobs: &[ExportJob]) -> Vec<ExportJob> {
    let mut ordered = jobs.to_vec();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority));
    ordered
}

/// Runs planned batches against a renderer.
pub struct ExportCoordinator<R> {
    renderer: Arc<R>,
    supervisor: TimeoutSupervisor,
}

impl<R: Renderer + 'static> ExportCoordinator<R> {
    pub fn new(renderer: R, supervisor: TimeoutSupervisor) -> Self {
        Self::from_arc(Arc::new(renderer), supervisor)
    }

    pub fn from_arc(renderer: Arc<R>, supervisor: TimeoutSupervisor) -> Self {
        Self {
            renderer,
            supervisor,
        }
    }

    /// Execute every job of `batch`, reporting through `reporter`.
    ///
    /// Never fails as a whole: each job ends in a [`JobResult`], listed in
    /// the batch's job order. Cancelling the reporter's batch stops new jobs
    /// from starting; finished results are kept.
    ///
    /// The run is a `batch_export` operation of the supervisor. Its hard
    /// deadline cancels the batch the same way.
    pub async fn execute_batch(&self, batch: &Batch, reporter: &ProgressReporter) -> BatchResult {
        let started = Instant::now();
        let total = batch.jobs.len();
        reporter.set_total(total);
        reporter.set_phase(Phase::Exporting, format!("{total} jobs queued"));

        let operation = self.supervisor.start_operation(
            format!("batch {}", batch.id),
            OperationCategory::BatchExport,
            OperationCallbacks::new().on_hard({
                let reporter = reporter.clone();
                move |record| {
                    tracing::warn!(
                        batch_id = %reporter.batch_id(),
                        elapsed_ms = record.elapsed().as_millis(),
                        "Batch hit the hard timeout, cancelling remaining jobs"
                    );
                    reporter.cancel();
                }
            }),
        );

        let ordered = optimize_job_order(&batch.jobs);
        let mut results = if self.renderer.is_available().await {
            let worker = Worker {
                renderer: Arc::clone(&self.renderer),
                supervisor: self.supervisor.clone(),
                reporter: reporter.clone(),
                overwrite: batch.config.overwrite,
            };
            let options = |job: &ExportJob| batch.config.render_options(job.format);
            run_jobs(&worker, ordered, batch.strategy.concurrency(), options).await
        } else {
            tracing::warn!(renderer = self.renderer.name(), "Renderer is not available");
            self.fail_unavailable(&ordered, reporter)
        };

        let position: HashMap<&str, usize> = batch
            .jobs
            .iter()
            .enumerate()
            .map(|(i, job)| (job.id.as_str(), i))
            .collect();
        results.sort_by_key(|r| position.get(r.job_id.as_str()).copied().unwrap_or(usize::MAX));

        let timed_out = operation.cancel_reason() == Some(CancelReason::HardTimeout);
        operation.complete();

        let cancelled = reporter.is_cancelled();
        let result = BatchResult::new(batch.id, results, started.elapsed(), cancelled);
        let summary = &result.summary;
        reporter.set_phase(
            Phase::Completing,
            format!(
                "{} of {} exported, {} failed",
                summary.successful, summary.total, summary.failed
            ),
        );

        tracing::info!(
            batch_id = %batch.id,
            successful = summary.successful,
            failed = summary.failed,
            cancelled = summary.cancelled,
            skipped = summary.skipped,
            timed_out,
            elapsed_ms = summary.total_duration.as_millis(),
            "Batch finished"
        );

        result
    }

    fn fail_unavailable(&self, jobs: &[ExportJob], reporter: &ProgressReporter) -> Vec<JobResult> {
        let hints: Vec<String> = self
            .renderer
            .required_dependencies()
            .into_iter()
            .map(|dep| format!("Install or start {dep}"))
            .chain(["Run `diagex check` to diagnose the renderer".to_owned()])
            .collect();

        jobs.iter()
            .map(|job| {
                let error = JobError::new(
                    job,
                    ErrorCode::RendererUnavailable,
                    format!("renderer {} is not available", self.renderer.name()),
                )
                .with_hints(hints.iter().cloned());
                reporter.job_finished();
                JobResult::failed(job, 0, Duration::ZERO, error)
            })
            .collect()
    }
}

/// Ready-queue scheduler: starts the first job whose dependencies are
/// finished, keeping at most `limit` in flight.
async fn run_jobs<R: Renderer + 'static>(
    worker: &Worker<R>,
    jobs: Vec<ExportJob>,
    limit: usize,
    options: impl Fn(&ExportJob) -> RenderOptions,
) -> Vec<JobResult> {
    let token = worker.reporter.cancellation_token().clone();
    let known: HashSet<String> = jobs.iter().map(|job| job.id.clone()).collect();
    let mut pending: VecDeque<ExportJob> = jobs.into();
    let mut finished: HashMap<String, JobStatus> = HashMap::new();
    let mut results = Vec::with_capacity(pending.len());
    let mut running = JoinSet::new();
    let mut in_flight = HashMap::new();

    loop {
        while running.len() < limit && !token.is_cancelled() {
            let ready = pending.iter().position(|job| {
                job.dependencies
                    .iter()
                    .all(|dep| finished.contains_key(dep) || !known.contains(dep))
            });
            let Some(job) = ready.and_then(|i| pending.remove(i)) else {
                break;
            };

            if let Some(dep) = job
                .dependencies
                .iter()
                .find(|dep| finished.get(*dep) != Some(&JobStatus::Success))
            {
                let error = JobError::new(
                    &job,
                    ErrorCode::DependencyFailed,
                    format!("dependency {dep} did not succeed"),
                );
                finished.insert(job.id.clone(), JobStatus::Failed);
                results.push(JobResult::failed(&job, 0, Duration::ZERO, error));
                worker.reporter.job_finished();
                continue;
            }

            let handle = running.spawn(worker.clone().run(job.clone(), options(&job)));
            in_flight.insert(handle.id(), job);
        }

        let Some(joined) = running.join_next_with_id().await else {
            break;
        };
        let result = match joined {
            Ok((id, result)) => {
                in_flight.remove(&id);
                result
            }
            Err(e) => {
                let Some(job) = in_flight.remove(&e.id()) else {
                    continue;
                };
                tracing::error!(job_id = %job.id, error = %e, "Export task failed");
                let error = JobError::new(&job, ErrorCode::TaskFailed, e.to_string());
                JobResult::failed(&job, 0, Duration::ZERO, error)
            }
        };
        finished.insert(result.job_id.clone(), result.status);
        results.push(result);
        worker.reporter.job_finished();
    }

    // Whatever is left was never started: cancelled, or stuck behind a cycle.
    for job in pending {
        let result = if token.is_cancelled() {
            JobResult::cancelled(&job, 0, Duration::ZERO)
        } else {
            let error = JobError::new(
                &job,
                ErrorCode::DependencyFailed,
                "dependencies can never finish (circular dependency)",
            );
            JobResult::failed(&job, 0, Duration::ZERO, error)
        };
        results.push(result);
        worker.reporter.job_finished();
    }

    results
}

/// Everything a spawned job needs.
struct Worker<R> {
    renderer: Arc<R>,
    supervisor: TimeoutSupervisor,
    reporter: ProgressReporter,
    overwrite: OverwritePolicy,
}

impl<R> Clone for Worker<R> {
    fn clone(&self) -> Self {
        Self {
            renderer: Arc::clone(&self.renderer),
            supervisor: self.supervisor.clone(),
            reporter: self.reporter.clone(),
            overwrite: self.overwrite,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error(transparent)]
    Render(RenderError),
    #[error(transparent)]
    Supervision(SupervisionError),
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Render(e) => e.is_retryable(),
            Self::Supervision(_) => false,
            Self::Write { .. } => true,
        }
    }

    fn into_job_error(self, job: &ExportJob) -> JobError {
        let retryable = self.is_retryable();
        let (code, hints): (ErrorCode, Vec<String>) = match &self {
            Self::Render(RenderError::UnsupportedFormat { renderer, format }) => (
                ErrorCode::UnsupportedFormat,
                vec![format!(
                    "{renderer} cannot produce {format}; set renderer.backend = \"cli\" in diagex.toml"
                )],
            ),
            Self::Render(_) => (
                ErrorCode::RenderFailed,
                vec![
                    "Check the diagram syntax".to_owned(),
                    "Run `diagex check` to verify the renderer".to_owned(),
                ],
            ),
            Self::Supervision(_) => (
                ErrorCode::Timeout,
                vec!["Simplify the diagram or raise [timeouts] export values in diagex.toml".to_owned()],
            ),
            Self::Write { path, .. } => (
                ErrorCode::WriteFailed,
                vec![format!("Check that {} is writable", path.display())],
            ),
        };
        JobError::new(job, code, self.to_string())
            .retryable(retryable)
            .with_hints(hints)
    }
}

impl<R: Renderer + 'static> Worker<R> {
    async fn run(self, job: ExportJob, options: RenderOptions) -> JobResult {
        let started = Instant::now();
        let token = self.reporter.cancellation_token().clone();
        self.reporter.set_current_job(&job.source_path, job.format);
        if token.is_cancelled() {
            return JobResult::cancelled(&job, 0, started.elapsed());
        }

        let Some(output_path) = self.resolve_output(&job.output_path).await else {
            tracing::debug!(job_id = %job.id, path = %job.output_path.display(), "Output exists, skipping");
            return JobResult::skipped(&job, started.elapsed());
        };

        let max_attempts = job.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self.attempt(&job, &options, &output_path).await {
                Ok(bytes) => {
                    tracing::debug!(job_id = %job.id, path = %output_path.display(), bytes, attempt, "Exported");
                    return JobResult::success(&job, attempt, started.elapsed(), output_path, bytes);
                }
                Err(AttemptError::Supervision(e)) if !e.is_timeout() => {
                    tracing::info!(job_id = %job.id, reason = %e.reason(), "Export cancelled");
                    return JobResult::cancelled(&job, attempt, started.elapsed());
                }
                Err(e) => e,
            };

            if !error.is_retryable() || attempt >= max_attempts {
                tracing::warn!(job_id = %job.id, attempt, error = %error, "Export failed");
                return JobResult::failed(&job, attempt, started.elapsed(), error.into_job_error(&job));
            }

            let delay = job.retry.delay_for_attempt(attempt);
            tracing::debug!(job_id = %job.id, attempt, delay_ms = delay.as_millis(), error = %error, "Retrying export");
            tokio::select! {
                () = token.cancelled() => {
                    return JobResult::cancelled(&job, attempt, started.elapsed());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(
        &self,
        job: &ExportJob,
        options: &RenderOptions,
        output_path: &Path,
    ) -> Result<u64, AttemptError> {
        let name = format!("export {} ({})", job.source_relative_path.display(), job.format.code());
        let callbacks = OperationCallbacks::new().on_hard({
            let id = job.id.clone();
            move |record| {
                tracing::warn!(job_id = %id, elapsed_ms = record.elapsed().as_millis(), "Export hit the hard timeout");
            }
        });
        let bytes = self
            .supervisor
            .supervise(
                name,
                OperationCategory::Export,
                callbacks,
                self.renderer.export(&job.diagram.content, options),
            )
            .await
            .map_err(AttemptError::Supervision)?
            .map_err(AttemptError::Render)?;

        let write_error = |source| AttemptError::Write {
            path: output_path.to_path_buf(),
            source,
        };
        if let Some(parent) = output_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
        }
        tokio::fs::write(output_path, &bytes).await.map_err(write_error)?;
        Ok(bytes.len() as u64)
    }

    /// Apply the overwrite policy. `None` means keep the existing file.
    async fn resolve_output(&self, path: &Path) -> Option<PathBuf> {
        match self.overwrite {
            OverwritePolicy::Overwrite => Some(path.to_path_buf()),
            OverwritePolicy::Skip => (!exists(path).await).then(|| path.to_path_buf()),
            OverwritePolicy::Rename => {
                if !exists(path).await {
                    return Some(path.to_path_buf());
                }
                let stem = path.file_stem().unwrap_or_default().to_string_lossy();
                let ext = path.extension().unwrap_or_default().to_string_lossy();
                let mut n = 2;
                loop {
                    let candidate = path.with_file_name(format!("{stem}-{n}.{ext}"));
                    if !exists(&candidate).await {
                        return Some(candidate);
                    }
                    n += 1;
                }
            }
        }
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
