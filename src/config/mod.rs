//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ResilienceConfig (validated, immutable)
//!     → tunings handed to the facade and retrier
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::ResilienceConfig;
pub use schema::OperationTuning;
pub use schema::TuningOverrides;
pub use schema::DatabaseConfig;
pub use schema::RetryConfig;
pub use schema::AlertConfig;
pub use schema::ObservabilityConfig;
