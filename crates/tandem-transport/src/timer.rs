//! Deferred continuations with cancellation.
//!
//! The reconnecting socket never sleeps directly; it asks a [`Timer`] to run
//! a continuation later and keeps the returned [`TimerHandle`] so the
//! continuation can be cancelled. [`TokioTimer`] schedules on the tokio
//! runtime, [`ManualTimer`] only fires when explicitly advanced.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A continuation run when a timer fires.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Schedules single deferred continuations.
pub trait Timer: Send + Sync {
    /// Run `task` once after `delay`, unless the handle is cancelled first.
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle;
}

/// Handle to a scheduled continuation.
///
/// Dropping the handle does not cancel the timer.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl TimerHandle {
    /// Create a handle that runs `cancel` when cancelled.
    #[must_use]
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Cancel the continuation. Has no effect if it already ran.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// Timer backed by the tokio runtime.
///
/// Must be used from within a runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        TimerHandle::new(move || handle.abort())
    }
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_id: u64,
    pending: BTreeMap<(Duration, u64), Task>,
}

/// Timer that fires only when advanced by hand.
///
/// Continuations due at the same instant run in scheduling order.
#[derive(Clone, Default)]
pub struct ManualTimer {
    state: Arc<Mutex<ManualState>>,
}

impl ManualTimer {
    /// Create a timer at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Time elapsed since creation.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    /// Number of continuations waiting to fire.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Advance time, running every continuation that becomes due.
    ///
    /// Continuations scheduled by a running continuation fire in the same
    /// call if they fall due before the target time. Returns the number of
    /// continuations run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.lock().now + by;
        let mut fired = 0;

        loop {
            let task = {
                let mut state = self.lock();
                let due = match state.pending.keys().next() {
                    Some(&key) if key.0 <= target => key,
                    _ => break,
                };
                state.now = due.0;
                state.pending.remove(&due)
            };

            // Run outside the lock; the task may schedule again.
            if let Some(task) = task {
                task();
                fired += 1;
            }
        }

        self.lock().now = target;
        fired
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Timer for ManualTimer {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let key = {
            let mut state = self.lock();
            let key = (state.now + delay, state.next_id);
            state.next_id += 1;
            state.pending.insert(key, task);
            key
        };

        let state = Arc::downgrade(&self.state);
        TimerHandle::new(move || {
            if let Some(state) = state.upgrade() {
                state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .pending
                    .remove(&key);
            }
        })
    }
}
