//! Timeout enforcement.
//!
//! # Responsibilities
//! - Run a unit of work exactly once under a wall-clock deadline
//! - Cancel the work cleanly on timeout (the future is dropped, child
//!   processes are spawned with `kill_on_drop`)
//! - Report panics inside the work as ordinary failures
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - Timed-out work reports `ExitSignal::TIMEOUT`, never an application code

use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::{self, Instant};

use crate::resilience::types::{ActionError, ExitSignal};

/// Deadline handed to an action so it can size its own I/O timeouts.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    timeout: Duration,
}

impl Deadline {
    /// Deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            timeout,
        }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    /// Total budget the invoker granted.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time left before the invoker gives up.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

/// Why an invocation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeFailure {
    /// The deadline passed before the action finished.
    TimedOut(Duration),
    /// The action returned an error or panicked.
    Failed(ActionError),
}

impl InvokeFailure {
    pub fn exit_signal(&self) -> ExitSignal {
        match self {
            InvokeFailure::TimedOut(_) => ExitSignal::TIMEOUT,
            InvokeFailure::Failed(e) => e.exit_signal,
        }
    }
}

/// Run `action` once, bounded by `timeout`.
pub async fn invoke_with_timeout<T, F, Fut>(timeout: Duration, action: F) -> Result<T, InvokeFailure>
where
    F: FnOnce(Deadline) -> Fut,
    Fut: Future<Output = Result<T, ActionError>>,
{
    let deadline = Deadline::after(timeout);
    // The closure call itself happens inside the guarded future.
    let work = AssertUnwindSafe(async move { action(deadline).await }).catch_unwind();

    match time::timeout(timeout, work).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(e))) => Err(InvokeFailure::Failed(e)),
        Ok(Err(panic)) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(panic = %message, "Action panicked");
            Err(InvokeFailure::Failed(ActionError::new(
                ExitSignal::SOFTWARE,
                format!("action panicked: {}", message),
            )))
        }
        Err(_) => {
            tracing::warn!(timeout_secs = timeout.as_secs_f64(), "Action timed out");
            Err(InvokeFailure::TimedOut(timeout))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success_passes_value_through() {
        let result = invoke_with_timeout(Duration::from_secs(1), |_| async { Ok::<_, ActionError>(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_failure_passes_exit_signal_through() {
        let result: Result<(), _> = invoke_with_timeout(Duration::from_secs(1), |_| async {
            Err(ActionError::new(3, "exit 3"))
        })
        .await;
        let failure = result.unwrap_err();
        assert_eq!(failure.exit_signal(), ExitSignal(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded_reports_timeout_signal() {
        let result: Result<(), _> = invoke_with_timeout(Duration::from_secs(5), |_| async {
            time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(InvokeFailure::TimedOut(Duration::from_secs(5))));
        assert_eq!(InvokeFailure::TimedOut(Duration::from_secs(5)).exit_signal(), ExitSignal::TIMEOUT);
    }

    #[tokio::test]
    async fn test_panic_is_reported_as_failure() {
        let explode = true;
        let result: Result<(), _> = invoke_with_timeout(Duration::from_secs(1), move |_| async move {
            if explode {
                panic!("kaboom");
            }
            Ok(())
        })
        .await;
        match result {
            Err(InvokeFailure::Failed(e)) => {
                assert_eq!(e.exit_signal, ExitSignal::SOFTWARE);
                assert!(e.message.contains("kaboom"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_remaining_shrinks() {
        let deadline = Deadline::after(Duration::from_secs(10));
        time::advance(Duration::from_secs(4)).await;
        assert_eq!(deadline.remaining(), Duration::from_secs(6));
        assert!(!deadline.is_expired());
        time::advance(Duration::from_secs(6)).await;
        assert!(deadline.is_expired());
        assert_eq!(deadline.timeout(), Duration::from_secs(10));
    }
}
