//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Registry, retrier and facade produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → Log aggregation (stderr, JSON when configured)
//!     → Any `metrics` recorder the host installs
//! ```
//!
//! # Design Decisions
//! - Structured logging with the operation name on every event
//! - Metrics are cheap (no-ops when no recorder is installed)

pub mod logging;
pub mod metrics;
