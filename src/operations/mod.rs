//! Operations protected by the circuit breaker registry.
//!
//! # Data Flow
//! ```text
//! Caller:
//!     → facade.rs (check preconditions, build operation name and tuning)
//!     → registry.execute (admit, timed invoke, record outcome)
//!     → http.rs / database.rs / files.rs (perform the work once)
//! ```
//!
//! # Design Decisions
//! - Preconditions fail before the registry sees the call
//! - Transports never retry; the retrier and the breaker are the only loops
//! - Child processes are killed when their future is dropped

pub mod database;
pub mod facade;
pub mod files;
pub mod http;
pub mod inputs;

pub use database::DbConnection;
pub use facade::ResilientOps;
pub use files::{FileOperation, FileOperationKind};
pub use http::{ApiRequest, ApiResponse};
pub use inputs::{FsInputValidator, InputKind, InputValidator};
