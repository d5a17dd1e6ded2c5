//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds and timeouts > 0, delays ordered)
//! - Check the alert webhook is a usable URL
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ResilienceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use crate::config::schema::ResilienceConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check every semantic constraint, collecting all failures.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (section, tuning) in config.tunings() {
        if tuning.failure_threshold == 0 {
            errors.push(ValidationError::new(
                format!("{}.failure_threshold", section),
                "must be at least 1",
            ));
        }
        if tuning.timeout_secs == 0 {
            errors.push(ValidationError::new(format!("{}.timeout_secs", section), "must be > 0"));
        }
        if tuning.reset_timeout_secs == 0 {
            errors.push(ValidationError::new(
                format!("{}.reset_timeout_secs", section),
                "must be > 0",
            ));
        }
    }

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        errors.push(ValidationError::new("retry.max_attempts", "must be at least 1"));
    }
    if retry.initial_delay_ms > retry.max_delay_ms {
        errors.push(ValidationError::new(
            "retry.initial_delay_ms",
            format!("must not exceed retry.max_delay_ms ({})", retry.max_delay_ms),
        ));
    }
    if !(0.0..=1.0).contains(&retry.jitter_ratio) {
        errors.push(ValidationError::new("retry.jitter_ratio", "must be between 0 and 1"));
    }

    if config.database.psql_path.as_os_str().is_empty() {
        errors.push(ValidationError::new("database.psql_path", "must not be empty"));
    }

    if let Some(webhook) = &config.alerts.webhook_url {
        match url::Url::parse(webhook) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(ValidationError::new(
                "alerts.webhook_url",
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new("alerts.webhook_url", e.to_string())),
        }
    }
    if config.alerts.webhook_timeout_secs == 0 {
        errors.push(ValidationError::new("alerts.webhook_timeout_secs", "must be > 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
