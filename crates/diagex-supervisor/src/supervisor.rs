//! Staged timeout supervision of running operations.
//!
//! Every operation gets four timers when it starts. Each tier escalates:
//!
//! | Tier    | Effect                                                        |
//! |---------|---------------------------------------------------------------|
//! | soft    | `on_soft`, operation marked warned                            |
//! | medium  | `on_medium` decides: keep waiting or cancel now               |
//! | hard    | `on_hard`, then `cleanup`; operation removed and cancelled    |
//! | nuclear | only acts on an operation that is still active                |
//!
//! Hard always removes the operation, so the nuclear handler finds nothing to
//! do. The tier stays in the policy so deadlines keep one shape everywhere.
//!
//! Callbacks run on the timer task while the operation's state lock is held;
//! completion and cancellation take the same lock, so once either returns no
//! further callback fires for that operation. Callbacks must not call back
//! into the supervisor for their own operation.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::time::Instant;

use crate::cancel::CancellationToken;
use crate::error::{PolicyError, SupervisionError};
use crate::policy::{OperationCategory, TimeoutPolicy};
use crate::timer::{Timer, TimerHandle};

/// Identifier of a supervised operation, unique per supervisor.
pub type OperationId = u64;

/// Default minimum spacing between operation starts.
pub const DEFAULT_EXPORT_COOLDOWN: Duration = Duration::from_secs(1);

/// Why an operation's token was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// `on_medium` chose to cancel.
    MediumTimeout,
    /// The hard deadline passed.
    HardTimeout,
    /// [`TimeoutSupervisor::cancel_operation`].
    User,
    /// [`TimeoutSupervisor::emergency_cleanup`].
    Emergency,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MediumTimeout => "medium timeout",
            Self::HardTimeout => "hard timeout",
            Self::User => "cancelled by user",
            Self::Emergency => "emergency cleanup",
        })
    }
}

/// Escalation stage of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStage {
    Running,
    SoftWarned,
    MediumWarned,
    Cancelling,
    Completed,
    Cancelled,
}

impl OperationStage {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// What to do when the medium deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediumDecision {
    #[default]
    KeepWaiting,
    Cancel,
}

/// Snapshot of an active operation.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub id: OperationId,
    pub name: String,
    pub category: OperationCategory,
    pub started_at: Instant,
    pub warned: bool,
    pub stage: OperationStage,
}

impl OperationRecord {
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

type StageFn = Box<dyn FnMut(&OperationRecord) + Send>;
type MediumFn = Box<dyn FnMut(&OperationRecord) -> MediumDecision + Send>;

/// Per-operation escalation hooks.
///
/// Unset hooks log through `tracing`; an unset `on_medium` keeps waiting.
#[derive(Default)]
pub struct OperationCallbacks {
    on_soft: Option<StageFn>,
    on_medium: Option<MediumFn>,
    on_hard: Option<StageFn>,
    on_nuclear: Option<StageFn>,
    cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl OperationCallbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_soft(mut self, f: impl FnMut(&OperationRecord) + Send + 'static) -> Self {
        self.on_soft = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_medium(
        mut self,
        f: impl FnMut(&OperationRecord) -> MediumDecision + Send + 'static,
    ) -> Self {
        self.on_medium = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_hard(mut self, f: impl FnMut(&OperationRecord) + Send + 'static) -> Self {
        self.on_hard = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_nuclear(mut self, f: impl FnMut(&OperationRecord) + Send + 'static) -> Self {
        self.on_nuclear = Some(Box::new(f));
        self
    }

    /// Runs once when the operation is cancelled for any reason.
    #[must_use]
    pub fn cleanup(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.cleanup = Some(Box::new(f));
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum Tier {
    Soft,
    Medium,
    Hard,
    Nuclear,
}

struct Operation {
    id: OperationId,
    name: String,
    category: OperationCategory,
    started_at: Instant,
    token: CancellationToken,
    state: Mutex<OperationState>,
}

struct OperationState {
    stage: OperationStage,
    warned: bool,
    cancel_reason: Option<CancelReason>,
    callbacks: OperationCallbacks,
    timers: Vec<TimerHandle>,
}

impl Operation {
    fn lock(&self) -> MutexGuard<'_, OperationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, state: &OperationState) -> OperationRecord {
        OperationRecord {
            id: self.id,
            name: self.name.clone(),
            category: self.category,
            started_at: self.started_at,
            warned: state.warned,
            stage: state.stage,
        }
    }
}

struct Inner {
    policy: TimeoutPolicy,
    cooldown: Duration,
    next_id: AtomicU64,
    operations: Mutex<HashMap<OperationId, Arc<Operation>>>,
    last_start: Mutex<Option<Instant>>,
}

impl Inner {
    fn operations(&self) -> MutexGuard<'_, HashMap<OperationId, Arc<Operation>>> {
        self.operations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, id: OperationId) -> Option<Arc<Operation>> {
        self.operations().get(&id).cloned()
    }

    fn remove(&self, id: OperationId) -> Option<Arc<Operation>> {
        self.operations().remove(&id)
    }

    fn on_deadline(&self, id: OperationId, tier: Tier) {
        let Some(op) = self.lookup(id) else {
            if matches!(tier, Tier::Nuclear) {
                tracing::trace!(id, "Nuclear deadline passed after operation ended");
            }
            return;
        };
        let mut state = op.lock();
        if state.stage.is_terminal() {
            return;
        }

        match tier {
            Tier::Soft => {
                state.stage = OperationStage::SoftWarned;
                state.warned = true;
                let record = op.record(&state);
                match state.callbacks.on_soft.as_mut() {
                    Some(f) => f(&record),
                    None => tracing::warn!(
                        id,
                        name = %op.name,
                        category = %op.category,
                        "Operation is taking longer than expected"
                    ),
                }
            }
            Tier::Medium => {
                state.stage = OperationStage::MediumWarned;
                state.warned = true;
                let record = op.record(&state);
                let decision = match state.callbacks.on_medium.as_mut() {
                    Some(f) => f(&record),
                    None => {
                        tracing::warn!(
                            id,
                            name = %op.name,
                            category = %op.category,
                            elapsed = ?record.elapsed(),
                            "Operation still running, waiting for hard deadline"
                        );
                        MediumDecision::KeepWaiting
                    }
                };
                if decision == MediumDecision::Cancel {
                    self.cancel_locked(&op, &mut state, CancelReason::MediumTimeout);
                }
            }
            Tier::Hard => {
                state.stage = OperationStage::Cancelling;
                let record = op.record(&state);
                match state.callbacks.on_hard.as_mut() {
                    Some(f) => f(&record),
                    None => tracing::error!(
                        id,
                        name = %op.name,
                        category = %op.category,
                        "Operation exceeded hard deadline, cancelling"
                    ),
                }
                self.cancel_locked(&op, &mut state, CancelReason::HardTimeout);
            }
            Tier::Nuclear => {
                let record = op.record(&state);
                match state.callbacks.on_nuclear.as_mut() {
                    Some(f) => f(&record),
                    None => tracing::error!(
                        id,
                        name = %op.name,
                        "Operation survived its hard deadline, forcing cleanup"
                    ),
                }
                self.cancel_locked(&op, &mut state, CancelReason::Emergency);
            }
        }
    }

    fn cancel_locked(&self, op: &Operation, state: &mut OperationState, reason: CancelReason) {
        self.remove(op.id);
        for timer in &state.timers {
            timer.cancel();
        }
        state.stage = OperationStage::Cancelled;
        state.cancel_reason = Some(reason);
        if let Some(cleanup) = state.callbacks.cleanup.take() {
            cleanup();
        }
        op.token.cancel();
        tracing::debug!(id = op.id, name = %op.name, %reason, "Operation cancelled");
    }

    fn complete(&self, op: &Operation) {
        self.remove(op.id);
        let mut state = op.lock();
        if state.stage.is_terminal() {
            return;
        }
        for timer in &state.timers {
            timer.cancel();
        }
        state.stage = OperationStage::Completed;
    }
}

/// Supervises running operations against a [`TimeoutPolicy`].
///
/// Cheap to clone; clones share the operation table.
#[derive(Clone)]
pub struct TimeoutSupervisor {
    inner: Arc<Inner>,
}

impl Default for TimeoutSupervisor {
    fn default() -> Self {
        Self::build(TimeoutPolicy::default(), DEFAULT_EXPORT_COOLDOWN)
    }
}

impl TimeoutSupervisor {
    /// Create a supervisor with a validated policy.
    pub fn new(policy: TimeoutPolicy, cooldown: Duration) -> Result<Self, PolicyError> {
        policy.validate()?;
        Ok(Self::build(policy, cooldown))
    }

    fn build(policy: TimeoutPolicy, cooldown: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                cooldown,
                next_id: AtomicU64::new(1),
                operations: Mutex::new(HashMap::new()),
                last_start: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &TimeoutPolicy {
        &self.inner.policy
    }

    /// Register an operation and arm its four deadline timers.
    ///
    /// Must be called within a tokio runtime.
    pub fn start_operation(
        &self,
        name: impl Into<String>,
        category: OperationCategory,
        callbacks: OperationCallbacks,
    ) -> OperationGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let started_at = Instant::now();
        let op = Arc::new(Operation {
            id,
            name: name.into(),
            category,
            started_at,
            token: CancellationToken::new(),
            state: Mutex::new(OperationState {
                stage: OperationStage::Running,
                warned: false,
                cancel_reason: None,
                callbacks,
                timers: Vec::with_capacity(4),
            }),
        });

        *self
            .inner
            .last_start
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(started_at);
        self.inner.operations().insert(id, Arc::clone(&op));

        let deadlines = self.inner.policy.for_category(category);
        let timers = [
            (deadlines.soft, Tier::Soft),
            (deadlines.medium, Tier::Medium),
            (deadlines.hard, Tier::Hard),
            (deadlines.nuclear, Tier::Nuclear),
        ]
        .into_iter()
        .map(|(delay, tier)| {
            let weak: Weak<Inner> = Arc::downgrade(&self.inner);
            Timer::schedule(delay, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_deadline(id, tier);
                }
            })
        })
        .collect();
        op.lock().timers = timers;

        tracing::debug!(id, name = %op.name, %category, "Operation started");

        OperationGuard {
            supervisor: self.clone(),
            op,
        }
    }

    /// Run `future` as a supervised operation.
    ///
    /// On cancellation the future is dropped, which force-terminates anything
    /// it owns (for example a child process spawned with `kill_on_drop`).
    pub async fn supervise<F, T>(
        &self,
        name: impl Into<String>,
        category: OperationCategory,
        callbacks: OperationCallbacks,
        future: F,
    ) -> Result<T, SupervisionError>
    where
        F: Future<Output = T>,
    {
        let guard = self.start_operation(name, category, callbacks);
        let token = guard.token().clone();

        tokio::select! {
            biased;
            () = token.cancelled() => Err(SupervisionError::Cancelled {
                id: guard.id(),
                reason: guard.cancel_reason().unwrap_or(CancelReason::User),
            }),
            output = future => {
                guard.complete();
                Ok(output)
            }
        }
    }

    /// Whether the cooldown since the most recent start has elapsed.
    #[must_use]
    pub fn can_start_export(&self) -> bool {
        self.export_cooldown_remaining().is_zero()
    }

    #[must_use]
    pub fn export_cooldown_remaining(&self) -> Duration {
        let last_start = *self
            .inner
            .last_start
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        last_start.map_or(Duration::ZERO, |started| {
            self.inner.cooldown.saturating_sub(started.elapsed())
        })
    }

    /// Cancel an active operation, running its cleanup. Returns `false` for unknown ids.
    pub fn cancel_operation(&self, id: OperationId) -> bool {
        let Some(op) = self.inner.lookup(id) else {
            return false;
        };
        let mut state = op.lock();
        if state.stage.is_terminal() {
            return false;
        }
        self.inner.cancel_locked(&op, &mut state, CancelReason::User);
        true
    }

    /// Mark an operation finished and disarm its timers. Returns `false` for unknown ids.
    pub fn complete_operation(&self, id: OperationId) -> bool {
        let Some(op) = self.inner.lookup(id) else {
            return false;
        };
        self.inner.complete(&op);
        true
    }

    /// Cancel every active operation. Returns how many were cancelled.
    pub fn emergency_cleanup(&self) -> usize {
        let ops: Vec<Arc<Operation>> = self.inner.operations().drain().map(|(_, op)| op).collect();
        let mut cancelled = 0;
        for op in ops {
            let mut state = op.lock();
            if !state.stage.is_terminal() {
                self.inner.cancel_locked(&op, &mut state, CancelReason::Emergency);
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            tracing::warn!(cancelled, "Emergency cleanup cancelled active operations");
        }
        cancelled
    }

    /// Snapshot of active operations, oldest first.
    #[must_use]
    pub fn active_operations(&self) -> Vec<OperationRecord> {
        let ops: Vec<Arc<Operation>> = self.inner.operations().values().cloned().collect();
        let mut records: Vec<_> = ops
            .iter()
            .filter_map(|op| {
                let state = op.lock();
                (!state.stage.is_terminal()).then(|| op.record(&state))
            })
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }
}

/// Handle to a running operation. Dropping it completes the operation.
pub struct OperationGuard {
    supervisor: TimeoutSupervisor,
    op: Arc<Operation>,
}

impl OperationGuard {
    #[must_use]
    pub fn id(&self) -> OperationId {
        self.op.id
    }

    /// Token cancelled when the operation is cancelled for any reason.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.op.token
    }

    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.op.lock().cancel_reason
    }

    pub fn complete(self) {
        // Drop does the work.
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.supervisor.inner.complete(&self.op);
    }
}
