//! Tower middleware that puts a [`RateGate`] in front of a service.
//!
//! Each request waits for admission before it reaches the inner service, and the
//! gate is notified once the inner call finishes, whatever its outcome.

use crate::error::GatedError;
use crate::gate::RateGate;
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// A layer that gates requests through a shared [`RateGate`].
#[derive(Clone, Debug)]
pub struct AdmissionLayer {
    gate: RateGate,
}

impl AdmissionLayer {
    /// Create a layer. Every service it wraps shares `gate`'s quota.
    pub fn new(gate: RateGate) -> Self {
        Self { gate }
    }

    /// The gate this layer admits through.
    pub fn gate(&self) -> &RateGate {
        &self.gate
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService { inner: service, gate: self.gate.clone() }
    }
}

/// Middleware service produced by [`AdmissionLayer`].
#[derive(Clone, Debug)]
pub struct AdmissionService<S> {
    inner: S,
    gate: RateGate,
}

impl<S, Req> Service<Req> for AdmissionService<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = GatedError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(GatedError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        // Queue now so requests are admitted in call order.
        let admission = self.gate.request_admission();
        let gate = self.gate.clone();
        // Take the service that was driven to readiness; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            admission.await?;
            let _completion = gate.completion_guard();
            inner.call(req).await.map_err(GatedError::Inner)
        })
    }
}
