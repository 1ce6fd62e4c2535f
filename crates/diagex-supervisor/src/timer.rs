//! Cancelable one-shot timers on tokio time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::cancel::CancellationToken;

/// Schedules callbacks after a delay.
pub struct Timer;

impl Timer {
    /// Run `f` once after `delay` unless the returned handle is cancelled first.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn schedule<F>(delay: Duration, f: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let state = Arc::new(TimerState::default());
        let task_state = Arc::clone(&state);

        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {
                    if !task_state.cancel.is_cancelled() {
                        task_state.fired.store(true, Ordering::SeqCst);
                        f();
                    }
                }
                () = task_state.cancel.cancelled() => {}
            }
        });

        TimerHandle { state }
    }
}

#[derive(Default)]
struct TimerState {
    fired: AtomicBool,
    cancel: CancellationToken,
}

/// Handle to a scheduled [`Timer`] callback.
///
/// Dropping the handle does not cancel the timer.
pub struct TimerHandle {
    state: Arc<TimerState>,
}

impl TimerHandle {
    /// Prevent the callback from running if it has not started yet.
    pub fn cancel(&self) {
        self.state.cancel.cancel();
    }

    /// Whether the callback has run (or is running).
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.state.fired.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_delay() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Timer::schedule(Duration::from_secs(5), {
            let count = Arc::clone(&count);
            move || {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!handle.has_fired());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.has_fired());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Timer::schedule(Duration::from_secs(5), {
            let count = Arc::clone(&count);
            move || {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(handle.is_cancelled());
        assert!(!handle.has_fired());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
