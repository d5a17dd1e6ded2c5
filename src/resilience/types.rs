//! Shared resilience types and error definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Exit signal surfaced to the calling program.
///
/// Process exit codes are passed through unchanged; the associated constants
/// cover outcomes the core produces itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExitSignal(pub i32);

impl ExitSignal {
    pub const SUCCESS: ExitSignal = ExitSignal(0);
    pub const FAILURE: ExitSignal = ExitSignal(1);
    /// Server answered with an error status (curl `--fail` uses 22 too).
    pub const HTTP_ERROR: ExitSignal = ExitSignal(22);
    /// Caller error: missing parameter, invalid input (EX_USAGE).
    pub const USAGE: ExitSignal = ExitSignal(64);
    /// Transport could not reach the resource (EX_UNAVAILABLE).
    pub const UNAVAILABLE: ExitSignal = ExitSignal(69);
    /// The action panicked (EX_SOFTWARE).
    pub const SOFTWARE: ExitSignal = ExitSignal(70);
    /// Local I/O error (EX_IOERR).
    pub const IO_ERROR: ExitSignal = ExitSignal(74);
    /// Not attempted, circuit is open (EX_TEMPFAIL).
    pub const CIRCUIT_OPEN: ExitSignal = ExitSignal(75);
    /// Deadline exceeded. Same code coreutils `timeout` uses.
    pub const TIMEOUT: ExitSignal = ExitSignal(124);

    pub fn code(self) -> i32 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self.0 == 0
    }
}

impl From<i32> for ExitSignal {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl From<ExitSignal> for i32 {
    fn from(signal: ExitSignal) -> Self {
        signal.0
    }
}

impl fmt::Display for ExitSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failure reported by an action itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (exit {exit_signal})")]
pub struct ActionError {
    pub exit_signal: ExitSignal,
    pub message: String,
}

impl ActionError {
    pub fn new(exit_signal: impl Into<ExitSignal>, message: impl Into<String>) -> Self {
        Self {
            exit_signal: exit_signal.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ActionError {
    fn from(e: std::io::Error) -> Self {
        ActionError::new(ExitSignal::IO_ERROR, e.to_string())
    }
}

/// Errors surfaced by the resilience core.
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// Caller bug: never touches breaker state.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The breaker rejected the call without running it.
    #[error("Circuit breaker is open for {operation} (retry in {}s)", .retry_after.as_secs())]
    CircuitOpen {
        operation: String,
        retry_after: Duration,
    },

    /// The action exceeded its deadline.
    #[error("Operation {operation} timed out after {} seconds", .after.as_secs())]
    TimedOut { operation: String, after: Duration },

    /// The action ran and failed.
    #[error("Operation {operation} failed: {message} (exit {exit_signal})")]
    Failed {
        operation: String,
        exit_signal: ExitSignal,
        message: String,
    },

    /// The backoff retrier ran out of attempts.
    #[error("Operation {operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: Box<ResilienceError>,
    },
}

impl ResilienceError {
    /// Exit signal for the calling program.
    pub fn exit_signal(&self) -> ExitSignal {
        match self {
            ResilienceError::InvalidInput(_) => ExitSignal::USAGE,
            ResilienceError::CircuitOpen { .. } => ExitSignal::CIRCUIT_OPEN,
            ResilienceError::TimedOut { .. } => ExitSignal::TIMEOUT,
            ResilienceError::Failed { exit_signal, .. } => *exit_signal,
            ResilienceError::RetriesExhausted { last, .. } => last.exit_signal(),
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen { .. })
    }

    /// True for outcomes the breaker counts as a failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResilienceError::TimedOut { .. } | ResilienceError::Failed { .. }
        )
    }
}

/// Result type for resilience operations.
pub type ResilienceResult<T> = Result<T, ResilienceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_signal_conversion() {
        let signal = ExitSignal::from(3);
        assert_eq!(signal.code(), 3);
        assert_eq!(i32::from(signal), 3);
        assert!(ExitSignal::SUCCESS.is_success());
        assert_ne!(ExitSignal::TIMEOUT, ExitSignal::CIRCUIT_OPEN);
    }

    #[test]
    fn test_error_exit_signals() {
        let err = ResilienceError::Failed {
            operation: "x".into(),
            exit_signal: ExitSignal(42),
            message: "boom".into(),
        };
        assert_eq!(err.exit_signal(), ExitSignal(42));
        assert!(err.is_transient());

        let wrapped = ResilienceError::RetriesExhausted {
            operation: "x".into(),
            attempts: 3,
            last: Box::new(err),
        };
        assert_eq!(wrapped.exit_signal(), ExitSignal(42));
        assert!(!wrapped.is_transient());

        let open = ResilienceError::CircuitOpen {
            operation: "x".into(),
            retry_after: Duration::from_secs(9),
        };
        assert!(open.is_circuit_open());
        assert_eq!(open.exit_signal(), ExitSignal::CIRCUIT_OPEN);
        assert!(open.to_string().contains("retry in 9s"));
    }

    #[test]
    fn test_error_display() {
        let err = ResilienceError::TimedOut {
            operation: "download_x".into(),
            after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "Operation download_x timed out after 30 seconds");
        assert_eq!(ResilienceError::InvalidInput("no".into()).exit_signal(), ExitSignal::USAGE);
    }
}
