//! Resilient operations library.
//!
//! Wraps unreliable external work (downloads, API calls, SQL scripts, file
//! operations) in per-operation circuit breakers with hard timeouts, plus a
//! bounded exponential-backoff retrier for local file work.

pub mod alerts;
pub mod config;
pub mod observability;
pub mod operations;
pub mod resilience;

pub use config::schema::ResilienceConfig;
pub use operations::ResilientOps;
pub use resilience::{CircuitBreakerRegistry, ExitSignal, ResilienceError, ResilienceResult};
