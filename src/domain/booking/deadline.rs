use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::AbortHandle;

use crate::domain::clock::clock::SharedClock;

/// Identifies one armed deadline. Stale handles are ignored by `cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeadlineHandle(u64);

#[derive(Debug)]
struct ArmedDeadline {
    handle: DeadlineHandle,
    task: AbortHandle,
}

#[derive(Debug, Default)]
struct DeadlineInner {
    armed: Mutex<Option<ArmedDeadline>>,
    next_handle: AtomicU64,
}

impl DeadlineInner {
    fn slot(&self) -> MutexGuard<'_, Option<ArmedDeadline>> {
        self.armed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One-shot timer with at most one pending deadline.
///
/// Cloning yields another handle on the same slot, which lets a stop handle
/// cancel what a session armed. Must be used inside a tokio runtime.
#[derive(Debug, Clone)]
pub struct DeadlineScheduler {
    clock: SharedClock,
    inner: Arc<DeadlineInner>,
}

impl DeadlineScheduler {
    pub fn new(clock: SharedClock) -> Self {
        DeadlineScheduler { clock, inner: Arc::new(DeadlineInner::default()) }
    }

    /// Fires `callback` once the clock reads at least `instant`; immediately if
    /// `instant` has passed. Replaces any deadline armed before.
    pub fn arm<F>(&self, instant: DateTime<Local>, callback: F) -> DeadlineHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = DeadlineHandle(self.inner.next_handle.fetch_add(1, Ordering::Relaxed));
        let clock = self.clock.clone();
        let inner = self.inner.clone();

        // Hold the slot while spawning so the task cannot observe an empty slot
        // and fire before it is registered.
        let mut slot = self.inner.slot();
        if let Some(previous) = slot.take() {
            log::debug!("Replacing armed deadline {:?}.", previous.handle);
            previous.task.abort();
        }

        let task = tokio::spawn(async move {
            loop {
                // Coarse timers may wake early; re-read the clock until the deadline is reached.
                match (instant - clock.now()).to_std() {
                    Ok(remaining) if !remaining.is_zero() => tokio::time::sleep(remaining).await,
                    _ => break,
                }
            }

            let still_armed = {
                let mut slot = inner.slot();
                match slot.as_ref() {
                    Some(armed) if armed.handle == handle => {
                        slot.take();
                        true
                    }
                    _ => false,
                }
            };

            if still_armed {
                log::debug!("Deadline {:?} fired at {}.", handle, clock.now().format("%H:%M:%S%.3f"));
                callback();
            }
        });

        *slot = Some(ArmedDeadline { handle, task: task.abort_handle() });
        handle
    }

    /// Cancels `handle` if it is still pending. Idempotent.
    pub fn cancel(&self, handle: DeadlineHandle) {
        let mut slot = self.inner.slot();
        if slot.as_ref().is_some_and(|armed| armed.handle == handle) {
            if let Some(armed) = slot.take() {
                armed.task.abort();
                log::debug!("Deadline {:?} cancelled.", handle);
            }
        }
    }

    pub fn is_armed(&self) -> bool {
        self.inner.slot().is_some()
    }
}
