#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # windowgate
//!
//! Fixed-window admission control for async Rust: callers queue up for permission
//! to run an operation, and the gate admits at most `N` of them per window `W`,
//! strictly in arrival order.
//!
//! ## Features
//!
//! - **FIFO admission** with cancellation when a waiting caller gives up
//! - **Fixed-window quota** reset by a single timer per window
//! - **Live reconfiguration** by count/window or requests per second
//! - **Pluggable timers** (`TokioTimer` in production, `ManualTimer` in tests)
//! - **Tower middleware** that gates a service and reports completions
//!
//! ## Quick Start
//!
//! ```rust
//! use windowgate::{RateGate, RateLimitConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let gate = RateGate::new(RateLimitConfig::new(3, Duration::from_secs(1)).unwrap()).unwrap();
//!
//!     let body = gate.run(|| async {
//!         // Your gated operation here
//!         "response"
//!     }).await;
//!
//!     assert_eq!(body, Ok("response"));
//! }
//! ```

pub mod config;
pub mod error;
pub mod gate;
pub mod layer;
pub mod prelude;
mod queue;
pub mod timer;
pub mod window;

// Re-exports
pub use config::{ConfigHandle, RateLimitConfig};
pub use error::{AdmissionError, ConfigError, GatedError};
pub use gate::{Admission, CompletionGuard, RateGate};
pub use layer::{AdmissionLayer, AdmissionService};
pub use queue::WaiterId;
pub use timer::{Liveness, ManualTimer, Timer, TimerCallback, TimerHandle, TokioTimer};
pub use window::{GateSnapshot, WindowPhase};
