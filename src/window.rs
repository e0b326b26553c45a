//! Window counter and the drain procedure.
//!
//! All queue mutation and every drain decision happen under one mutex, so the
//! three triggers (enqueue, completion, window reset) are serialized no matter
//! which thread they arrive on. Each `drain` admits at most one waiter.
//!
//! Phases, as seen between drains:
//!
//! ```text
//! Idle (0, no timer) --admit--> Active (0 < n < max) --admit--> Saturated (n == max)
//!        ^                                                             |
//!        +------------- timer fires: n := 0, drain again --------------+
//! ```

use crate::config::{ConfigHandle, RateLimitConfig};
use crate::error::AdmissionError;
use crate::queue::{AdmissionQueue, WaiterId};
use crate::timer::{Liveness, Timer, TimerHandle};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

/// Where the current window stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPhase {
    /// Nothing admitted yet; no reset timer armed.
    Idle,
    /// Some admissions this window, quota not reached.
    Active,
    /// Quota reached; nothing more until the timer resets the window.
    Saturated,
    /// The gate was shut down.
    Closed,
}

/// Per-window bookkeeping.
#[derive(Debug, Default)]
struct WindowState {
    admitted: u32,
    reset_timer: Option<TimerHandle>,
}

impl WindowState {
    /// Admissions granted since the last reset.
    fn admitted(&self) -> u32 {
        self.admitted
    }

    /// Whether a reset timer is armed.
    fn timer_active(&self) -> bool {
        self.reset_timer.as_ref().is_some_and(TimerHandle::is_pending)
    }

    fn phase(&self, config: &RateLimitConfig) -> WindowPhase {
        if self.admitted == 0 {
            WindowPhase::Idle
        } else if self.admitted >= config.max_requests() {
            WindowPhase::Saturated
        } else {
            WindowPhase::Active
        }
    }
}

#[derive(Debug, Default)]
struct GateState {
    queue: AdmissionQueue,
    window: WindowState,
    closed: bool,
}

/// Point-in-time view of a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSnapshot {
    pub phase: WindowPhase,
    pub admitted: u32,
    pub queued: usize,
    pub timer_active: bool,
    pub config: RateLimitConfig,
}

/// Owner of the queue, the window counter and the reset timer.
#[derive(Debug)]
pub(crate) struct WindowController {
    state: Mutex<GateState>,
    config: ConfigHandle,
    timer: Arc<dyn Timer>,
}

impl WindowController {
    pub(crate) fn new(config: ConfigHandle, timer: Arc<dyn Timer>) -> Self {
        Self { state: Mutex::new(GateState::default()), config, timer }
    }

    pub(crate) fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub(crate) fn timer(&self) -> &Arc<dyn Timer> {
        &self.timer
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a waiter at the tail. Does not drain.
    pub(crate) fn enqueue(&self, grant: oneshot::Sender<()>) -> Result<WaiterId, AdmissionError> {
        let mut state = self.lock();
        if state.closed {
            return Err(AdmissionError::Closed);
        }
        let id = state.queue.enqueue(grant);
        tracing::debug!(waiter = id.get(), queued = state.queue.len(), "admission requested");
        Ok(id)
    }

    /// Remove a still-queued waiter. Leaves the window count untouched.
    pub(crate) fn cancel(&self, id: WaiterId) -> bool {
        let mut state = self.lock();
        let removed = state.queue.remove(id).is_some();
        if removed {
            tracing::debug!(waiter = id.get(), queued = state.queue.len(), "admission cancelled");
        }
        removed
    }

    /// Admit at most one waiter, subject to the window quota.
    ///
    /// Safe to call at any time; an empty queue, a saturated window and a closed
    /// gate are all no-ops.
    pub(crate) fn drain(self: &Arc<Self>) {
        let config = self.config.get();
        let mut guard = self.lock();
        let state = &mut *guard;

        if state.closed || state.queue.is_empty() {
            return;
        }

        if state.window.admitted >= config.max_requests() {
            // Only the reset timer can unblock a saturated window.
            if let Some(timer) = &state.window.reset_timer {
                timer.set_liveness(Liveness::KeepAlive);
            }
            tracing::trace!(
                admitted = state.window.admitted,
                max = config.max_requests(),
                queued = state.queue.len(),
                "window saturated"
            );
            return;
        }

        // Waiters whose caller already went away are dropped without using quota.
        let waiter = loop {
            let Some(waiter) = state.queue.dequeue_front() else {
                return;
            };
            if !waiter.is_abandoned() {
                break waiter;
            }
            tracing::debug!(waiter = waiter.id().get(), "skipped abandoned admission request");
        };

        // Count the grant and arm the reset before the caller can observe it.
        if state.window.admitted == 0 && state.window.reset_timer.is_none() {
            let liveness =
                if state.queue.is_empty() { Liveness::Idle } else { Liveness::KeepAlive };
            state.window.reset_timer = Some(self.arm_reset(&config, liveness));
        }
        state.window.admitted = state.window.admitted.saturating_add(1);

        let id = waiter.id();
        // A caller that leaves between the check above and here still uses the slot.
        let delivered = waiter.admit();
        tracing::debug!(
            waiter = id.get(),
            delivered,
            admitted = state.window.admitted,
            max = config.max_requests(),
            queued = state.queue.len(),
            "admission granted"
        );
    }

    fn arm_reset(self: &Arc<Self>, config: &RateLimitConfig, liveness: Liveness) -> TimerHandle {
        let weak = Arc::downgrade(self);
        self.timer.schedule_once(
            config.window(),
            liveness,
            Box::new(move || {
                if let Some(controller) = weak.upgrade() {
                    controller.reset_window();
                }
            }),
        )
    }

    fn reset_window(self: &Arc<Self>) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            tracing::debug!(
                admitted = state.window.admitted,
                queued = state.queue.len(),
                "window reset"
            );
            state.window.admitted = 0;
            state.window.reset_timer = None;
        }
        self.drain();
    }

    /// Cancel the reset timer and fail every queued waiter with `Closed`.
    pub(crate) fn shutdown(&self) {
        let waiters = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            if let Some(timer) = state.window.reset_timer.take() {
                timer.cancel();
            }
            state.queue.take_all()
        };
        tracing::info!(dropped = waiters.len(), "admission gate shut down");
        // Dropping the senders resolves every pending Admission with Closed.
        drop(waiters);
    }

    pub(crate) fn snapshot(&self) -> GateSnapshot {
        let config = *self.config.get();
        let state = self.lock();
        let phase = if state.closed { WindowPhase::Closed } else { state.window.phase(&config) };
        GateSnapshot {
            phase,
            admitted: state.window.admitted(),
            queued: state.queue.len(),
            timer_active: state.window.timer_active(),
            config,
        }
    }
}
