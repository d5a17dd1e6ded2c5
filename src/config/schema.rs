//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! resilience core. All types derive Serde traits for deserialization from
//! config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::resilience::circuit_breaker::BreakerTuning;

/// Root configuration.
///
/// Each operation section only overrides the fields it names; the rest come
/// from that operation class's built-in tuning.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Registry defaults for work units that don't override them.
    pub breaker: TuningOverrides,

    /// Tuning for URL downloads.
    pub download: TuningOverrides,

    /// Tuning for HTTP API calls.
    pub api: TuningOverrides,

    /// Database statement execution.
    pub database: DatabaseConfig,

    /// Tuning for single file operations.
    pub file_ops: TuningOverrides,

    /// Backoff retrier settings.
    pub retry: RetryConfig,

    /// Failure marker and alert settings.
    pub alerts: AlertConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ResilienceConfig {
    pub fn breaker_tuning(&self) -> OperationTuning {
        self.breaker.apply(OperationTuning::default())
    }

    pub fn download_tuning(&self) -> OperationTuning {
        self.download.apply(OperationTuning::network())
    }

    pub fn api_tuning(&self) -> OperationTuning {
        self.api.apply(OperationTuning::network())
    }

    pub fn database_tuning(&self) -> OperationTuning {
        self.database.overrides.apply(OperationTuning::database())
    }

    pub fn file_ops_tuning(&self) -> OperationTuning {
        self.file_ops.apply(OperationTuning::network())
    }

    /// Every resolved tuning with its section name, for validation.
    pub fn tunings(&self) -> [(&'static str, OperationTuning); 5] {
        [
            ("breaker", self.breaker_tuning()),
            ("download", self.download_tuning()),
            ("api", self.api_tuning()),
            ("database", self.database_tuning()),
            ("file_ops", self.file_ops_tuning()),
        ]
    }
}

/// Per-section overrides of an operation class's tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TuningOverrides {
    pub failure_threshold: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub reset_timeout_secs: Option<u64>,
}

impl TuningOverrides {
    pub fn apply(&self, base: OperationTuning) -> OperationTuning {
        OperationTuning {
            failure_threshold: self.failure_threshold.unwrap_or(base.failure_threshold),
            timeout_secs: self.timeout_secs.unwrap_or(base.timeout_secs),
            reset_timeout_secs: self.reset_timeout_secs.unwrap_or(base.reset_timeout_secs),
        }
    }
}

/// Circuit breaker tuning for one class of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct OperationTuning {
    /// Failures before the circuit opens.
    pub failure_threshold: u32,

    /// Per-call timeout in seconds.
    pub timeout_secs: u64,

    /// Seconds after the last failure before a probe is allowed.
    pub reset_timeout_secs: u64,
}

impl Default for OperationTuning {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_secs: 30,
            reset_timeout_secs: 60,
        }
    }
}

impl OperationTuning {
    /// Downloads, API calls and file operations.
    pub fn network() -> Self {
        Self {
            failure_threshold: 3,
            timeout_secs: 30,
            reset_timeout_secs: 120,
        }
    }

    /// Database statement execution.
    pub fn database() -> Self {
        Self {
            failure_threshold: 3,
            timeout_secs: 60,
            reset_timeout_secs: 300,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }

    /// Same tuning with a different timeout.
    pub fn with_timeout(self, timeout: Option<Duration>) -> BreakerTuning {
        let mut tuning = BreakerTuning::from(self);
        if let Some(timeout) = timeout {
            tuning.timeout = timeout;
        }
        tuning
    }
}

impl From<OperationTuning> for BreakerTuning {
    fn from(t: OperationTuning) -> Self {
        BreakerTuning {
            failure_threshold: t.failure_threshold,
            timeout: t.timeout(),
            reset_timeout: t.reset_timeout(),
        }
    }
}

/// Database execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Breaker tuning overrides for statement execution.
    #[serde(flatten)]
    pub overrides: TuningOverrides,

    /// SQL client binary.
    pub psql_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            overrides: TuningOverrides::default(),
            psql_path: PathBuf::from("psql"),
        }
    }
}

/// Backoff retrier configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,

    /// Delay after the first failed attempt in milliseconds.
    pub initial_delay_ms: u64,

    /// Delay cap in milliseconds.
    pub max_delay_ms: u64,

    /// Fraction of each delay added as random jitter (0 = exact delays).
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter_ratio: 0.0,
        }
    }
}

/// Failure marker and alert configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Directory for failure markers when no explicit path is given.
    pub marker_dir: PathBuf,

    /// Optional webhook receiving failure reports as JSON.
    pub webhook_url: Option<String>,

    /// Webhook request timeout in seconds.
    pub webhook_timeout_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            marker_dir: PathBuf::from("/var/tmp/resilient-ops"),
            webhook_url: None,
            webhook_timeout_secs: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
