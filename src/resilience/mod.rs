//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Work unit for a named operation:
//!     → circuit_breaker.rs (admit: closed, half-open probe, or reject)
//!     → timeouts.rs (run the action once under a deadline)
//!     → circuit_breaker.rs (record success or failure, maybe open circuit)
//!
//! Local retry of a file operation:
//!     → retries.rs (attempt, cleanup, sleep per backoff.rs, attempt again)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every action has a deadline
//! - The registry never retries; the retrier never touches the registry
//! - Circuit state is per operation name, owned by an explicit registry

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;
pub mod types;

pub use backoff::{calculate_backoff, BackoffSchedule};
pub use circuit_breaker::{BreakerTuning, CircuitBreakerRegistry, CircuitSnapshot, CircuitState, WorkUnit};
pub use retries::BackoffRetrier;
pub use timeouts::{invoke_with_timeout, Deadline, InvokeFailure};
pub use types::{ActionError, ExitSignal, ResilienceError, ResilienceResult};
