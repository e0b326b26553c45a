//! The admission gate callers talk to.

use crate::config::{ConfigHandle, RateLimitConfig};
use crate::error::{AdmissionError, ConfigError};
use crate::queue::WaiterId;
use crate::timer::{Timer, TokioTimer};
use crate::window::{GateSnapshot, WindowController};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// Fixed-window admission gate: at most `max_requests` admissions per window,
/// granted strictly in request order.
///
/// Clones share the same queue, counter and timer, so one gate enforces one
/// global quota across every clone.
///
/// # Examples
/// ```
/// use windowgate::{RateGate, RateLimitConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let gate = RateGate::new(RateLimitConfig::per_second(5).unwrap()).unwrap();
///     gate.acquire().await.unwrap();
///     // ... perform the gated operation ...
///     gate.notify_completion();
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RateGate {
    controller: Arc<WindowController>,
}

impl RateGate {
    /// Create a gate driven by the current tokio runtime.
    ///
    /// Errors if `max_requests` is zero, or with [`ConfigError::NoRuntime`] when
    /// called outside a runtime. Once built, the gate may be used from any thread.
    pub fn new(config: RateLimitConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Self::with_timer(config, TokioTimer::try_current()?)
    }

    /// Create a gate whose timers run on `runtime`. Usable outside a runtime context.
    pub fn with_runtime(config: RateLimitConfig, runtime: Handle) -> Result<Self, ConfigError> {
        Self::with_timer(config, TokioTimer::new(runtime))
    }

    /// Create a gate with a custom timer (e.g. [`ManualTimer`](crate::ManualTimer) in tests).
    pub fn with_timer<T: Timer + 'static>(
        config: RateLimitConfig,
        timer: T,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let controller = WindowController::new(ConfigHandle::new(config), Arc::new(timer));
        Ok(Self { controller: Arc::new(controller) })
    }

    /// `requests_per_second` admissions per one-second window, on tokio.
    pub fn per_second(requests_per_second: u32) -> Result<Self, ConfigError> {
        Self::new(RateLimitConfig::per_second(requests_per_second)?)
    }

    /// Replace the quota. Takes effect on the next drain decision; admissions
    /// already counted in the current window are not revisited.
    pub fn configure(&self, max_requests: u32, window: Duration) -> Result<(), ConfigError> {
        self.controller.config().set(RateLimitConfig::new(max_requests, window)?)
    }

    /// Equivalent to `configure(requests_per_second, 1s)`.
    pub fn configure_by_rate(&self, requests_per_second: u32) -> Result<(), ConfigError> {
        self.controller.config().set(RateLimitConfig::per_second(requests_per_second)?)
    }

    /// Current quota expressed as requests per second. Fails for a zero window.
    pub fn current_rate(&self) -> Result<f64, ConfigError> {
        self.controller.config().get().requests_per_second()
    }

    /// Current quota.
    pub fn config(&self) -> RateLimitConfig {
        *self.controller.config().get()
    }

    /// Live handle to the quota, for wiring into a reloadable config layer.
    pub fn config_handle(&self) -> ConfigHandle {
        self.controller.config().clone()
    }

    /// Queue a request for admission and schedule a drain on a later scheduler turn.
    ///
    /// The request joins the queue before this returns, so a burst of calls made
    /// back to back is fully queued, in call order, before any of it is considered.
    /// Await the returned [`Admission`] to wait for permission; drop it to give up
    /// the queue slot.
    pub fn request_admission(&self) -> Admission {
        let (grant, granted) = oneshot::channel();
        let id = match self.controller.enqueue(grant) {
            Ok(id) => id,
            Err(_) => return Admission { state: AdmissionState::Rejected },
        };

        let weak = Arc::downgrade(&self.controller);
        self.controller.timer().defer(Box::new(move || {
            if let Some(controller) = weak.upgrade() {
                controller.drain();
            }
        }));

        Admission {
            state: AdmissionState::Waiting { id, granted, controller: self.controller.clone() },
        }
    }

    /// Wait for admission.
    pub async fn acquire(&self) -> Result<(), AdmissionError> {
        self.request_admission().await
    }

    /// Report that an admitted operation finished, successfully or not.
    ///
    /// Triggers one drain. It does not give quota back: admissions are counted per
    /// window, not per in-flight operation.
    pub fn notify_completion(&self) {
        self.controller.drain();
    }

    /// Guard that calls [`notify_completion`](Self::notify_completion) when dropped.
    pub fn completion_guard(&self) -> CompletionGuard {
        CompletionGuard { controller: Arc::downgrade(&self.controller) }
    }

    /// Wait for admission, run `operation`, then notify completion.
    ///
    /// Completion is reported even if the operation's future is dropped part way.
    pub async fn run<T, Fut, Op>(&self, operation: Op) -> Result<T, AdmissionError>
    where
        Fut: Future<Output = T>,
        Op: FnOnce() -> Fut,
    {
        self.acquire().await?;
        let _done = self.completion_guard();
        Ok(operation().await)
    }

    /// Number of requests waiting for admission.
    pub fn queued(&self) -> usize {
        self.controller.snapshot().queued
    }

    /// Current window phase, counters and quota.
    pub fn snapshot(&self) -> GateSnapshot {
        self.controller.snapshot()
    }

    /// Stop the gate: cancel the reset timer and fail all queued requests with
    /// [`AdmissionError::Closed`]. Later requests fail immediately. Idempotent.
    pub fn shutdown(&self) {
        self.controller.shutdown();
    }
}

/// Calls `notify_completion` on the gate when dropped.
#[derive(Debug)]
#[must_use = "completion is reported when the guard is dropped"]
pub struct CompletionGuard {
    controller: Weak<WindowController>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(controller) = self.controller.upgrade() {
            controller.drain();
        }
    }
}

/// A queued request for admission.
///
/// Resolves to `Ok(())` once admitted, or `Err(AdmissionError::Closed)` if the gate
/// shut down first. Dropping it before it resolves removes it from the queue.
///
/// # Panics
///
/// Polling again after it has resolved panics, as with most futures. Wrap it in
/// [`futures::future::Fuse`] to poll past completion.
#[derive(Debug)]
#[must_use = "admission is only observed by awaiting it"]
pub struct Admission {
    state: AdmissionState,
}

#[derive(Debug)]
enum AdmissionState {
    Waiting {
        id: WaiterId,
        granted: oneshot::Receiver<()>,
        controller: Arc<WindowController>,
    },
    Rejected,
    Done,
}

impl Admission {
    /// Identifier of the queued request, while it is still waiting.
    pub fn id(&self) -> Option<WaiterId> {
        match &self.state {
            AdmissionState::Waiting { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Give up the queue slot. Returns `true` if the request was still queued;
    /// `false` if it had already been admitted or the gate closed.
    pub fn cancel(mut self) -> bool {
        match std::mem::replace(&mut self.state, AdmissionState::Done) {
            AdmissionState::Waiting { id, controller, .. } => controller.cancel(id),
            _ => false,
        }
    }
}

impl Future for Admission {
    type Output = Result<(), AdmissionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = match &mut self.state {
            AdmissionState::Waiting { granted, .. } => match Pin::new(granted).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(())) => Ok(()),
                Poll::Ready(Err(_)) => Err(AdmissionError::Closed),
            },
            AdmissionState::Rejected => Err(AdmissionError::Closed),
            AdmissionState::Done => panic!("Admission polled after completion"),
        };
        self.state = AdmissionState::Done;
        Poll::Ready(result)
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if let AdmissionState::Waiting { id, controller, .. } = &self.state {
            controller.cancel(*id);
        }
    }
}
