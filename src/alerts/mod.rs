//! Failure markers and alert delivery.
//!
//! # Data Flow
//! ```text
//! Terminal failure in the calling program:
//!     → FailureReport (script, exit code, message, required action)
//!     → marker.rs (persist "do not re-run" marker as JSON)
//!     → notify.rs (POST the report to an optional webhook)
//! ```
//!
//! # Design Decisions
//! - The resilience core never writes markers; only the caller does
//! - Marker I/O errors propagate, webhook delivery errors are only logged

pub mod marker;
pub mod notify;

pub use marker::{AlertError, FailureMarker, FailureReport};
pub use notify::AlertEmitter;
