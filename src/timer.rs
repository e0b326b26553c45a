//! Abstraction for one-shot deferred callbacks
//!
//! The gate never reads the clock itself; it only asks a [`Timer`] to call it back.
//! That keeps window tests deterministic: [`ManualTimer`] lets a test decide exactly
//! when each window ends.

use crate::error::ConfigError;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;

/// Callback run when a timer fires or a deferred task runs.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Whether a pending timer should keep its scheduler alive.
///
/// A hint only. Timers that cannot honor it must still fire on schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The pending timer counts as outstanding work.
    KeepAlive,
    /// The pending timer must not hold the scheduler open on its own.
    Idle,
}

/// Source of one-shot callbacks.
pub trait Timer: Send + Sync + fmt::Debug {
    /// Run `callback` once after `delay`, unless the returned handle is cancelled first.
    fn schedule_once(&self, delay: Duration, liveness: Liveness, callback: TimerCallback)
        -> TimerHandle;

    /// Run `callback` on a later turn of the scheduler, never on the caller's stack.
    fn defer(&self, callback: TimerCallback);
}

/// Handle to a scheduled timer. Clones refer to the same timer.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    state: Arc<TimerState>,
}

#[derive(Debug)]
struct TimerState {
    pending: AtomicBool,
    keep_alive: AtomicBool,
    abort: Mutex<Option<tokio::task::AbortHandle>>,
}

impl TimerHandle {
    /// Create a pending handle. Timer implementations call this from `schedule_once`.
    pub fn new(liveness: Liveness) -> Self {
        Self {
            state: Arc::new(TimerState {
                pending: AtomicBool::new(true),
                keep_alive: AtomicBool::new(liveness == Liveness::KeepAlive),
                abort: Mutex::new(None),
            }),
        }
    }

    fn with_abort(self, abort: tokio::task::AbortHandle) -> Self {
        *lock(&self.state.abort) = Some(abort);
        self
    }

    /// Mark the timer as fired. Returns `false` if it was cancelled or already fired,
    /// in which case the callback must not run.
    pub fn fire(&self) -> bool {
        self.state.pending.swap(false, Ordering::AcqRel)
    }

    /// Cancel the timer. No-op if it already fired.
    pub fn cancel(&self) {
        if self.state.pending.swap(false, Ordering::AcqRel) {
            if let Some(abort) = lock(&self.state.abort).take() {
                abort.abort();
            }
        }
    }

    /// `true` until the timer fires or is cancelled.
    pub fn is_pending(&self) -> bool {
        self.state.pending.load(Ordering::Acquire)
    }

    /// Current liveness hint.
    pub fn liveness(&self) -> Liveness {
        if self.state.keep_alive.load(Ordering::Acquire) {
            Liveness::KeepAlive
        } else {
            Liveness::Idle
        }
    }

    /// Change the liveness hint of a pending timer.
    pub fn set_liveness(&self, liveness: Liveness) {
        self.state.keep_alive.store(liveness == Liveness::KeepAlive, Ordering::Release);
    }
}

/// Production timer on the tokio runtime.
///
/// Holds a handle to the runtime it was created on and spawns every timer task
/// there, so a gate can be drained from any thread, including ones that are not
/// part of a runtime. Tokio does not wait for spawned timer tasks on shutdown, so
/// [`Liveness::Idle`] is always satisfied and [`Liveness::KeepAlive`] is only
/// recorded on the handle.
#[derive(Debug, Clone)]
pub struct TokioTimer {
    runtime: Handle,
}

impl TokioTimer {
    /// Timer bound to the given runtime.
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Timer bound to the runtime the caller is running on.
    ///
    /// Fails with [`ConfigError::NoRuntime`] outside a tokio runtime.
    pub fn try_current() -> Result<Self, ConfigError> {
        Handle::try_current().map(Self::new).map_err(|_| ConfigError::NoRuntime)
    }
}

impl Timer for TokioTimer {
    fn schedule_once(
        &self,
        delay: Duration,
        liveness: Liveness,
        callback: TimerCallback,
    ) -> TimerHandle {
        let handle = TimerHandle::new(liveness);
        let fired = handle.clone();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if fired.fire() {
                callback();
            }
        });
        handle.with_abort(task.abort_handle())
    }

    fn defer(&self, callback: TimerCallback) {
        self.runtime.spawn(async move {
            callback();
        });
    }
}

/// Test timer that only fires when told to
#[derive(Debug, Clone, Default)]
pub struct ManualTimer {
    inner: Arc<Mutex<ManualState>>,
}

#[derive(Default)]
struct ManualState {
    scheduled: VecDeque<Scheduled>,
    deferred: VecDeque<TimerCallback>,
    history: Vec<(Duration, Liveness)>,
}

struct Scheduled {
    delay: Duration,
    handle: TimerHandle,
    callback: TimerCallback,
}

impl fmt::Debug for ManualState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualState")
            .field("scheduled", &self.scheduled.len())
            .field("deferred", &self.deferred.len())
            .field("history", &self.history)
            .finish()
    }
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run deferred callbacks until none are left, including ones queued while running.
    /// Returns how many ran.
    pub fn run_deferred(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = lock(&self.inner).deferred.pop_front();
            match next {
                Some(callback) => {
                    callback();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Fire the oldest pending timer, skipping cancelled ones.
    /// Returns `false` if there was nothing to fire.
    pub fn fire_next(&self) -> bool {
        loop {
            let next = lock(&self.inner).scheduled.pop_front();
            match next {
                Some(entry) => {
                    if entry.handle.fire() {
                        (entry.callback)();
                        return true;
                    }
                }
                None => return false,
            }
        }
    }

    /// Delay and current liveness of every pending timer, oldest first.
    pub fn pending(&self) -> Vec<(Duration, Liveness)> {
        lock(&self.inner)
            .scheduled
            .iter()
            .filter(|s| s.handle.is_pending())
            .map(|s| (s.delay, s.handle.liveness()))
            .collect()
    }

    /// Every `schedule_once` call so far, with the liveness it was armed with.
    pub fn history(&self) -> Vec<(Duration, Liveness)> {
        lock(&self.inner).history.clone()
    }

    /// Number of deferred callbacks waiting to run.
    pub fn deferred_len(&self) -> usize {
        lock(&self.inner).deferred.len()
    }
}

impl Timer for ManualTimer {
    fn schedule_once(
        &self,
        delay: Duration,
        liveness: Liveness,
        callback: TimerCallback,
    ) -> TimerHandle {
        let handle = TimerHandle::new(liveness);
        let mut state = lock(&self.inner);
        state.history.push((delay, liveness));
        state.scheduled.push_back(Scheduled { delay, handle: handle.clone(), callback });
        handle
    }

    fn defer(&self, callback: TimerCallback) {
        lock(&self.inner).deferred.push_back(callback);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_callback(counter: &Arc<AtomicUsize>) -> TimerCallback {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn manual_timer_fires_in_schedule_order() {
        let timer = ManualTimer::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            timer.schedule_once(
                Duration::from_millis(10),
                Liveness::KeepAlive,
                Box::new(move || order.lock().unwrap().push(i)),
            );
        }
        while timer.fire_next() {}
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn manual_timer_skips_cancelled() {
        let timer = ManualTimer::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handle =
            timer.schedule_once(Duration::from_millis(5), Liveness::Idle, counter_callback(&count));
        handle.cancel();
        assert!(!handle.is_pending());
        assert!(timer.pending().is_empty());
        assert!(!timer.fire_next());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn manual_timer_records_liveness_changes() {
        let timer = ManualTimer::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handle =
            timer.schedule_once(Duration::from_millis(5), Liveness::Idle, counter_callback(&count));
        assert_eq!(timer.pending(), vec![(Duration::from_millis(5), Liveness::Idle)]);
        handle.set_liveness(Liveness::KeepAlive);
        assert_eq!(timer.pending(), vec![(Duration::from_millis(5), Liveness::KeepAlive)]);
        assert_eq!(timer.history(), vec![(Duration::from_millis(5), Liveness::Idle)]);
    }

    #[test]
    fn manual_timer_defers_until_run() {
        let timer = ManualTimer::new();
        let count = Arc::new(AtomicUsize::new(0));
        timer.defer(counter_callback(&count));
        timer.defer(counter_callback(&count));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(timer.deferred_len(), 2);
        assert_eq!(timer.run_deferred(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handle_fires_at_most_once() {
        let handle = TimerHandle::new(Liveness::KeepAlive);
        assert!(handle.fire());
        assert!(!handle.fire());
        handle.cancel();
        assert!(!handle.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_timer_fires_after_delay() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = TokioTimer::try_current().unwrap().schedule_once(
            Duration::from_millis(100),
            Liveness::KeepAlive,
            counter_callback(&count),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(handle.is_pending());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!handle.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_timer_cancel_prevents_fire() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = TokioTimer::try_current().unwrap().schedule_once(
            Duration::from_millis(100),
            Liveness::Idle,
            counter_callback(&count),
        );
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tokio_timer_defer_runs_off_stack() {
        let count = Arc::new(AtomicUsize::new(0));
        TokioTimer::try_current().unwrap().defer(counter_callback(&count));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tokio_timer_needs_a_runtime() {
        assert_eq!(TokioTimer::try_current().unwrap_err(), ConfigError::NoRuntime);
    }

    #[tokio::test]
    async fn tokio_timer_schedules_from_plain_thread() {
        let count = Arc::new(AtomicUsize::new(0));
        let timer = TokioTimer::try_current().unwrap();
        let callback = counter_callback(&count);
        let handle = std::thread::spawn(move || {
            timer.schedule_once(Duration::from_millis(5), Liveness::Idle, callback)
        })
        .join()
        .expect("scheduling off the runtime must not panic");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!handle.is_pending());
    }
}
