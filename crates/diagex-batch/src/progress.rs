//! Per-batch progress state with cancellation and change notifications.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use diagex_render::ExportFormat;
use diagex_supervisor::CancellationToken;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

/// Message set when a batch is cancelled.
pub const CANCELLED_MESSAGE: &str = "Operation cancelled";

/// Stage of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Discovery,
    Planning,
    Exporting,
    Completing,
}

/// Snapshot of a batch's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressState {
    pub phase: Phase,
    /// Fraction complete, `0.0..=1.0`.
    pub fraction: f64,
    pub completed_jobs: usize,
    pub total_jobs: usize,
    pub message: String,
    pub cancelled: bool,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            phase: Phase::Discovery,
            fraction: 0.0,
            completed_jobs: 0,
            total_jobs: 0,
            message: String::new(),
            cancelled: false,
        }
    }
}

/// Published on every state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub batch_id: Uuid,
    pub phase: Phase,
    pub message: String,
    pub fraction: f64,
    pub completed_jobs: usize,
    pub total_jobs: usize,
    pub cancelled: bool,
}

struct Entry {
    state: ProgressState,
    token: CancellationToken,
}

#[derive(Clone)]
struct Shared {
    entries: Arc<Mutex<HashMap<Uuid, Entry>>>,
    events: broadcast::Sender<ProgressEvent>,
}

impl Shared {
    /// Apply `f` to the batch's state and publish the result.
    ///
    /// Returns `false` when the batch is unknown.
    fn update(&self, batch_id: Uuid, f: impl FnOnce(&mut Entry)) -> bool {
        let event = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(entry) = entries.get_mut(&batch_id) else {
                return false;
            };
            f(entry);
            let state = &entry.state;
            ProgressEvent {
                batch_id,
                phase: state.phase,
                message: state.message.clone(),
                fraction: state.fraction,
                completed_jobs: state.completed_jobs,
                total_jobs: state.total_jobs,
                cancelled: state.cancelled,
            }
        };
        // No subscribers is fine.
        let _ = self.events.send(event);
        true
    }

    fn cancel(&self, batch_id: Uuid) -> bool {
        let found = self.update(batch_id, |entry| {
            entry.state.cancelled = true;
            entry.state.message = CANCELLED_MESSAGE.to_owned();
            entry.token.cancel();
        });
        if found {
            tracing::info!(%batch_id, "Batch cancelled");
        }
        found
    }
}

/// Tracks progress of concurrently running batches.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ProgressTracker {
    shared: Shared,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Shared {
                entries: Arc::new(Mutex::new(HashMap::new())),
                events,
            },
        }
    }

    /// Register `batch_id` and return its reporter.
    ///
    /// Registering an id again resets its state.
    pub fn create_reporter(&self, batch_id: Uuid) -> ProgressReporter {
        let token = CancellationToken::new();
        self.shared
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                batch_id,
                Entry {
                    state: ProgressState::default(),
                    token: token.clone(),
                },
            );
        ProgressReporter {
            batch_id,
            shared: self.shared.clone(),
            token,
        }
    }

    #[must_use]
    pub fn get_progress(&self, batch_id: Uuid) -> Option<ProgressState> {
        self.shared
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&batch_id)
            .map(|entry| entry.state.clone())
    }

    /// Cancel a batch. Returns `false` for an unknown id.
    pub fn cancel(&self, batch_id: Uuid) -> bool {
        self.shared.cancel(batch_id)
    }

    /// Forget a batch. Unknown ids are ignored.
    pub fn cleanup(&self, batch_id: Uuid) {
        self.shared
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&batch_id);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.shared.events.subscribe()
    }
}

/// Handle used by a running batch to report progress.
///
/// Calls after [`ProgressTracker::cleanup`] do nothing.
#[derive(Clone)]
pub struct ProgressReporter {
    batch_id: Uuid,
    shared: Shared,
    token: CancellationToken,
}

impl ProgressReporter {
    #[must_use]
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Enter `phase`. Completing an uncancelled batch sets the fraction to 1.
    pub fn set_phase(&self, phase: Phase, message: impl Into<String>) {
        let message = message.into();
        self.shared.update(self.batch_id, |entry| {
            let state = &mut entry.state;
            state.phase = phase;
            if !state.cancelled {
                state.message = message;
                if phase == Phase::Completing {
                    state.fraction = 1.0;
                }
            }
        });
    }

    pub fn set_total(&self, total_jobs: usize) {
        self.shared.update(self.batch_id, |entry| {
            entry.state.total_jobs = total_jobs;
            entry.state.completed_jobs = 0;
            entry.state.fraction = 0.0;
        });
    }

    /// Announce the job being exported, by source base name and format code.
    pub fn set_current_job(&self, source_path: &Path, format: ExportFormat) {
        let name = source_path
            .file_name()
            .map_or_else(|| source_path.display().to_string(), |n| n.to_string_lossy().into_owned());
        self.set_message(format!("Exporting {name} ({})", format.code()));
    }

    /// Count one more finished job.
    pub fn job_finished(&self) {
        self.shared.update(self.batch_id, |entry| {
            let state = &mut entry.state;
            state.completed_jobs += 1;
            if state.total_jobs > 0 {
                state.completed_jobs = state.completed_jobs.min(state.total_jobs);
                #[allow(clippy::cast_precision_loss)]
                let fraction = state.completed_jobs as f64 / state.total_jobs as f64;
                state.fraction = fraction;
            }
        });
    }

    /// Replace the message. Ignored once the batch is cancelled.
    pub fn set_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.shared.update(self.batch_id, |entry| {
            if !entry.state.cancelled {
                entry.state.message = message;
            }
        });
    }

    /// Cancel this reporter's batch, as [`ProgressTracker::cancel`] does.
    ///
    /// The token is cancelled even after the batch was cleaned up.
    pub fn cancel(&self) {
        self.token.cancel();
        self.shared.cancel(self.batch_id);
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_current_job_uses_base_name_and_code() {
        let tracker = ProgressTracker::new();
        let id = Uuid::new_v4();
        let reporter = tracker.create_reporter(id);

        reporter.set_current_job(Path::new("/very/deep/nested/path/diagram.md"), ExportFormat::Svg);
        assert_eq!(tracker.get_progress(id).unwrap().message, "Exporting diagram.md (SVG)");

        reporter.set_current_job(Path::new("flow.mmd"), ExportFormat::Webp);
        assert_eq!(tracker.get_progress(id).unwrap().message, "Exporting flow.mmd (WEBP)");
    }

    #[test]
    fn test_fraction_follows_finished_jobs() {
        let tracker = ProgressTracker::new();
        let id = Uuid::new_v4();
        let reporter = tracker.create_reporter(id);
        reporter.set_phase(Phase::Exporting, "Exporting");
        reporter.set_total(4);

        reporter.job_finished();
        let state = tracker.get_progress(id).unwrap();
        assert_eq!(state.completed_jobs, 1);
        assert!((state.fraction - 0.25).abs() < f64::EPSILON);

        for _ in 0..3 {
            reporter.job_finished();
        }
        reporter.set_phase(Phase::Completing, "Done");
        let state = tracker.get_progress(id).unwrap();
        assert_eq!(state.phase, Phase::Completing);
        assert_eq!(state.completed_jobs, 4);
        assert!((state.fraction - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cancel_sets_message_and_token() {
        let tracker = ProgressTracker::new();
        let id = Uuid::new_v4();
        let reporter = tracker.create_reporter(id);
        reporter.set_total(10);
        reporter.job_finished();

        assert!(tracker.cancel(id));
        assert!(reporter.is_cancelled());
        let state = tracker.get_progress(id).unwrap();
        assert!(state.cancelled);
        assert_eq!(state.message, CANCELLED_MESSAGE);

        // Later job updates keep the cancelled message.
        reporter.set_current_job(Path::new("a.mmd"), ExportFormat::Png);
        reporter.set_phase(Phase::Completing, "Done");
        let state = tracker.get_progress(id).unwrap();
        assert_eq!(state.message, CANCELLED_MESSAGE);
        assert!(state.fraction < 1.0);
    }

    #[test]
    fn test_reporter_cancel_matches_tracker_cancel() {
        let tracker = ProgressTracker::new();
        let id = Uuid::new_v4();
        let reporter = tracker.create_reporter(id);
        let other = tracker.create_reporter(Uuid::new_v4());

        reporter.clone().cancel();

        assert!(reporter.is_cancelled());
        assert!(!other.is_cancelled());
        let state = tracker.get_progress(id).unwrap();
        assert!(state.cancelled);
        assert_eq!(state.message, CANCELLED_MESSAGE);

        let late = tracker.create_reporter(Uuid::new_v4());
        tracker.cleanup(late.batch_id());
        late.cancel();
        assert!(late.is_cancelled());
        assert!(tracker.get_progress(late.batch_id()).is_none());
    }

    #[test]
    fn test_unknown_and_cleaned_up_batches() {
        let tracker = ProgressTracker::new();
        assert!(!tracker.cancel(Uuid::new_v4()));
        tracker.cleanup(Uuid::new_v4());

        let id = Uuid::new_v4();
        let reporter = tracker.create_reporter(id);
        tracker.cleanup(id);
        assert_eq!(tracker.get_progress(id), None);

        reporter.set_total(3);
        reporter.job_finished();
        assert_eq!(tracker.get_progress(id), None);
    }

    #[test]
    fn test_batches_do_not_share_state() {
        let tracker = ProgressTracker::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let reporter_a = tracker.create_reporter(a);
        let reporter_b = tracker.create_reporter(b);
        reporter_a.set_total(2);
        reporter_b.set_total(5);
        reporter_a.job_finished();

        assert!(tracker.cancel(b));
        assert!(!reporter_a.is_cancelled());
        assert!(reporter_b.is_cancelled());
        assert_eq!(tracker.get_progress(a).unwrap().completed_jobs, 1);
        assert_eq!(tracker.get_progress(b).unwrap().completed_jobs, 0);
    }

    #[test]
    fn test_state_changes_are_published() {
        let tracker = ProgressTracker::new();
        let mut events = tracker.subscribe();
        let id = Uuid::new_v4();
        let reporter = tracker.create_reporter(id);

        reporter.set_phase(Phase::Planning, "Planning 3 jobs");
        reporter.set_total(3);
        reporter.job_finished();
        tracker.cancel(id);

        let first = events.try_recv().unwrap();
        assert_eq!(first.batch_id, id);
        assert_eq!(first.phase, Phase::Planning);
        assert_eq!(first.message, "Planning 3 jobs");

        let second = events.try_recv().unwrap();
        assert_eq!(second.total_jobs, 3);

        let third = events.try_recv().unwrap();
        assert_eq!(third.completed_jobs, 1);

        let fourth = events.try_recv().unwrap();
        assert!(fourth.cancelled);
        assert_eq!(fourth.message, CANCELLED_MESSAGE);
        assert!(events.try_recv().is_err());
    }
}
