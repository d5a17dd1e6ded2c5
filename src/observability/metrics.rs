//! Metrics collection.
//!
//! # Metrics
//! - `resilience_executions_total` (counter): breaker executions by operation, outcome
//! - `resilience_execution_duration_seconds` (histogram): action latency
//! - `resilience_circuit_transitions_total` (counter): state changes by operation, from, to
//! - `resilience_rejections_total` (counter): calls refused by an open circuit
//! - `resilience_retry_attempts_total` (counter): attempts made by the backoff retrier
//!
//! # Design Decisions
//! - The library never installs a recorder; the host process chooses one
//! - Labels carry the operation name so circuits can be told apart

use std::time::Duration;

use crate::resilience::circuit_breaker::CircuitState;

/// Record one breaker execution.
pub fn record_execution(operation: &str, outcome: &'static str, elapsed: Duration) {
    let operation = operation.to_string();
    metrics::counter!(
        "resilience_executions_total",
        "operation" => operation.clone(),
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!("resilience_execution_duration_seconds", "operation" => operation)
        .record(elapsed.as_secs_f64());
}

/// Record a circuit state change.
pub fn record_transition(operation: &str, from: CircuitState, to: CircuitState) {
    metrics::counter!(
        "resilience_circuit_transitions_total",
        "operation" => operation.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

/// Record a call refused by an open circuit.
pub fn record_rejection(operation: &str) {
    metrics::counter!("resilience_rejections_total", "operation" => operation.to_string()).increment(1);
}

/// Record one retrier attempt.
pub fn record_retry_attempt(operation: &str) {
    metrics::counter!("resilience_retry_attempts_total", "operation" => operation.to_string()).increment(1);
}
