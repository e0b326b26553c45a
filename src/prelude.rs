//! Convenient re-exports for common windowgate types.
pub use crate::{
    config::{ConfigHandle, RateLimitConfig},
    error::{AdmissionError, ConfigError, GatedError},
    gate::{Admission, RateGate},
    layer::{AdmissionLayer, AdmissionService},
    timer::{Liveness, Timer, TokioTimer},
    window::{GateSnapshot, WindowPhase},
};
