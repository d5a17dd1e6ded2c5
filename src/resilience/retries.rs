//! Retry logic.
//!
//! # Responsibilities
//! - Execute an operation up to `max_attempts` times with doubling delay
//! - Run a best-effort cleanup step between attempts
//! - Report exhaustion as a terminal error carrying the last failure
//!
//! # Design Decisions
//! - Stateless across calls; never touches the circuit breaker registry
//! - Cleanup failures are logged and ignored
//! - No delay after the final attempt

use std::future::Future;
use std::time::Duration;

use crate::config::schema::RetryConfig;
use crate::observability::metrics;
use crate::operations::files::FileOperation;
use crate::resilience::backoff::BackoffSchedule;
use crate::resilience::types::{ActionError, ResilienceError, ResilienceResult};

/// Bounded local retry loop with exponential backoff.
#[derive(Debug, Clone, Default)]
pub struct BackoffRetrier {
    schedule: BackoffSchedule,
}

impl BackoffRetrier {
    pub fn new(schedule: BackoffSchedule) -> Self {
        Self { schedule }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(BackoffSchedule {
            initial: Duration::from_millis(config.initial_delay_ms),
            max: Duration::from_millis(config.max_delay_ms),
            jitter_ratio: config.jitter_ratio,
        })
    }

    pub fn schedule(&self) -> &BackoffSchedule {
        &self.schedule
    }

    /// Retry `attempt_fn` without a cleanup step.
    pub async fn retry<T, F, Fut>(&self, operation: &str, max_attempts: u32, attempt_fn: F) -> ResilienceResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ActionError>>,
    {
        self.retry_with_cleanup(operation, max_attempts, attempt_fn, || async { Ok::<(), ActionError>(()) })
            .await
    }

    /// Retry `attempt_fn`, running `cleanup` after every failed attempt that
    /// will be followed by another one.
    pub async fn retry_with_cleanup<T, F, Fut, C, CFut>(
        &self,
        operation: &str,
        max_attempts: u32,
        mut attempt_fn: F,
        mut cleanup: C,
    ) -> ResilienceResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ActionError>>,
        C: FnMut() -> CFut,
        CFut: Future<Output = Result<(), ActionError>>,
    {
        if max_attempts == 0 {
            return Err(ResilienceError::InvalidInput(format!(
                "max attempts for {} must be at least 1",
                operation
            )));
        }

        let mut attempt = 1;
        loop {
            metrics::record_retry_attempt(operation);
            match attempt_fn(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation = %operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt >= max_attempts => {
                    tracing::error!(
                        operation = %operation,
                        attempts = attempt,
                        error = %e,
                        "All attempts failed"
                    );
                    return Err(ResilienceError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        last: Box::new(ResilienceError::Failed {
                            operation: operation.to_string(),
                            exit_signal: e.exit_signal,
                            message: e.message,
                        }),
                    });
                }
                Err(e) => {
                    let delay = self.schedule.delay_for(attempt);
                    tracing::warn!(
                        operation = %operation,
                        attempt,
                        max_attempts,
                        delay = ?delay,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    if let Err(cleanup_error) = cleanup().await {
                        tracing::debug!(operation = %operation, error = %cleanup_error, "Cleanup failed, ignoring");
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Retry a file operation.
    pub async fn retry_file_operation(&self, op: &FileOperation, max_attempts: u32) -> ResilienceResult<()> {
        self.retry(&op.operation_name(), max_attempts, |_| op.run()).await
    }

    /// Retry a file operation with a cleanup step between attempts.
    pub async fn retry_file_operation_with_cleanup<C, CFut>(
        &self,
        op: &FileOperation,
        max_attempts: u32,
        cleanup: C,
    ) -> ResilienceResult<()>
    where
        C: FnMut() -> CFut,
        CFut: Future<Output = Result<(), ActionError>>,
    {
        self.retry_with_cleanup(&op.operation_name(), max_attempts, |_| op.run(), cleanup)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::types::ExitSignal;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_with_doubling_delays() {
        let retrier = BackoffRetrier::default();
        let attempt_times = Arc::new(Mutex::new(Vec::new()));
        let cleanups = Arc::new(AtomicU32::new(0));

        let times = attempt_times.clone();
        let cleanup_count = cleanups.clone();
        let result = retrier
            .retry_with_cleanup(
                "copy",
                3,
                move |attempt| {
                    times.lock().unwrap().push(Instant::now());
                    async move {
                        if attempt < 3 {
                            Err(ActionError::new(1, "transient"))
                        } else {
                            Ok(attempt)
                        }
                    }
                },
                move || {
                    cleanup_count.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<(), ActionError>(()) }
                },
            )
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);
        let times = attempt_times.lock().unwrap();
        assert_eq!(times.len(), 3);
        assert_eq!(times[1] - times[0], Duration::from_secs(1));
        assert_eq!(times[2] - times[1], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_stops_after_max_attempts() {
        let retrier = BackoffRetrier::default();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let start = Instant::now();

        let err = retrier
            .retry("delete", 3, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ActionError::new(5, "denied")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s, never a third delay.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        match &err {
            ResilienceError::RetriesExhausted { attempts, .. } => assert_eq!(*attempts, 3),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(err.exit_signal(), ExitSignal(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_failure_is_ignored() {
        let retrier = BackoffRetrier::default();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retrier
            .retry_with_cleanup(
                "move",
                2,
                move |attempt| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt == 1 {
                            Err(ActionError::new(1, "first"))
                        } else {
                            Ok(())
                        }
                    }
                },
                || async { Err::<(), _>(ActionError::new(1, "cleanup broke")) },
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_attempts_is_invalid() {
        let retrier = BackoffRetrier::default();
        let err = retrier
            .retry("x", 0, |_| async { Ok::<_, ActionError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::InvalidInput(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_is_capped() {
        let retrier = BackoffRetrier::new(BackoffSchedule {
            initial: Duration::from_secs(40),
            max: Duration::from_secs(60),
            jitter_ratio: 0.0,
        });
        let start = Instant::now();
        let _ = retrier
            .retry("x", 3, |_| async { Err::<(), _>(ActionError::new(1, "no")) })
            .await;
        // 40s then min(80s, 60s).
        assert_eq!(start.elapsed(), Duration::from_secs(100));
    }

    #[tokio::test]
    async fn test_retry_real_file_operation() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, "data").unwrap();
        let op = FileOperation::copy(&src, dir.path().join("b.txt")).unwrap();

        BackoffRetrier::default().retry_file_operation(&op, 3).await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("b.txt")).unwrap(), "data");
    }

    #[test]
    fn test_from_config() {
        let config = RetryConfig::default();
        let retrier = BackoffRetrier::from_config(&config);
        assert_eq!(retrier.schedule().initial, Duration::from_secs(1));
        assert_eq!(retrier.schedule().max, Duration::from_secs(60));
    }
}
