//! Error types for the admission gate
use std::fmt;

/// Rejected gate configuration.
///
/// Reported synchronously to whoever configures the gate; never surfaced to a
/// caller waiting on an [`Admission`](crate::Admission).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `max_requests` of zero would starve every queued request forever.
    #[error("max_requests must be > 0 (a zero quota never admits anything)")]
    ZeroQuota,
    /// Requests-per-second is undefined for a zero-length window.
    #[error("window is zero; requests per second is undefined")]
    ZeroWindow,
    /// A tokio-driven gate was built outside a tokio runtime.
    #[error("no tokio runtime available; create the gate inside a runtime or pass a runtime handle")]
    NoRuntime,
}

/// Reason an [`Admission`](crate::Admission) resolved without being granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// The gate was shut down before this request was admitted.
    #[error("admission gate is closed")]
    Closed,
}

/// Error returned by [`AdmissionService`](crate::AdmissionService).
#[derive(Debug, Clone)]
pub enum GatedError<E> {
    /// The gate shut down before the request was admitted; the inner service was not called.
    Closed,
    /// The inner service failed after admission.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for GatedError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "request not admitted: gate is closed"),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for GatedError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Closed => None,
        }
    }
}

impl<E> From<AdmissionError> for GatedError<E> {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::Closed => GatedError::Closed,
        }
    }
}

impl<E> GatedError<E> {
    /// Check if the request was refused because the gate closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Closed => None,
        }
    }

    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Closed => None,
        }
    }
}
