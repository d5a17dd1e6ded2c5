//! Circuit breaker registry for protecting unreliable operations.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: resource assumed down, calls fail fast
//! - Half-Open: testing if the resource recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold
//! Open → Half-Open: next call after reset timeout since the last failure
//! Half-Open → Closed: probe call succeeds
//! Half-Open → Open: probe call fails
//! Any success → Closed with failure_count = 0
//! ```
//!
//! # Design Decisions
//! - Per-operation circuit breaker (not global), keyed by operation name
//! - Fail fast in Open state (no waiting for timeout)
//! - Single probe in Half-Open (prevents hammering recovering resource)
//! - Any success clears the failure counter; this is not a sliding window
//! - Entry locks are held only for admit/record decisions, never across the
//!   action itself

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::observability::metrics;
use crate::resilience::timeouts::{invoke_with_timeout, Deadline, InvokeFailure};
use crate::resilience::types::{ActionError, ResilienceError, ResilienceResult};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker tuning for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerTuning {
    /// Failures before the circuit opens.
    pub failure_threshold: u32,
    /// Per-call execution timeout.
    pub timeout: Duration,
    /// Time since the last failure before a probe is allowed.
    pub reset_timeout: Duration,
}

impl Default for BreakerTuning {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// An action plus its per-call timeout and breaker tuning.
///
/// Unset fields fall back to the registry defaults.
pub struct WorkUnit<F> {
    action: F,
    failure_threshold: Option<u32>,
    timeout: Option<Duration>,
    reset_timeout: Option<Duration>,
}

impl<F> WorkUnit<F> {
    pub fn new(action: F) -> Self {
        Self {
            action,
            failure_threshold: None,
            timeout: None,
            reset_timeout: None,
        }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn reset_timeout(mut self, reset_timeout: Duration) -> Self {
        self.reset_timeout = Some(reset_timeout);
        self
    }

    /// Override every tuning field at once.
    pub fn tuning(self, tuning: BreakerTuning) -> Self {
        self.failure_threshold(tuning.failure_threshold)
            .timeout(tuning.timeout)
            .reset_timeout(tuning.reset_timeout)
    }

    fn resolve(&self, defaults: &BreakerTuning) -> BreakerTuning {
        BreakerTuning {
            failure_threshold: self.failure_threshold.unwrap_or(defaults.failure_threshold),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            reset_timeout: self.reset_timeout.unwrap_or(defaults.reset_timeout),
        }
    }
}

/// Mutable per-operation record. Only the registry touches it.
#[derive(Debug, Clone, Default)]
struct CircuitRecord {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    /// Token of the Half-Open probe currently running, if any.
    probe: Option<u64>,
    /// Last token handed out.
    probe_generation: u64,
}

/// Read-only view of a circuit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    /// Monotonic offset of the last failure from registry creation; `None`
    /// when the operation never failed.
    pub last_failure: Option<Duration>,
}

/// Owns one independent circuit per operation name.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    records: DashMap<String, CircuitRecord>,
    defaults: BreakerTuning,
    epoch: Instant,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerTuning::default())
    }
}

impl CircuitBreakerRegistry {
    /// Create a registry. `defaults` apply to work units that don't override them.
    pub fn new(defaults: BreakerTuning) -> Self {
        tracing::debug!(
            failure_threshold = defaults.failure_threshold,
            timeout_secs = defaults.timeout.as_secs(),
            reset_timeout_secs = defaults.reset_timeout.as_secs(),
            "Circuit breaker registry created"
        );
        Self {
            records: DashMap::new(),
            defaults,
            epoch: Instant::now(),
        }
    }

    pub fn defaults(&self) -> &BreakerTuning {
        &self.defaults
    }

    /// Run `unit` under the circuit for `name`.
    ///
    /// Invokes the action at most once. Rejections and precondition errors
    /// never run it.
    pub async fn execute<T, F, Fut>(&self, name: &str, unit: WorkUnit<F>) -> ResilienceResult<T>
    where
        F: FnOnce(Deadline) -> Fut,
        Fut: Future<Output = Result<T, ActionError>>,
    {
        if name.trim().is_empty() {
            return Err(ResilienceError::InvalidInput(
                "operation name must not be empty".to_string(),
            ));
        }
        let tuning = unit.resolve(&self.defaults);
        if tuning.failure_threshold == 0 {
            return Err(ResilienceError::InvalidInput(format!(
                "failure threshold for {} must be at least 1",
                name
            )));
        }

        let probe = self.admit(name, &tuning)?;
        let mut probe_guard = probe.map(|token| ProbeGuard {
            registry: self,
            name,
            token,
        });

        let started = Instant::now();
        let outcome = invoke_with_timeout(tuning.timeout, unit.action).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(value) => {
                self.record_success(name, probe);
                if let Some(guard) = probe_guard.take() {
                    guard.disarm();
                }
                metrics::record_execution(name, "success", elapsed);
                Ok(value)
            }
            Err(failure) => {
                self.record_failure(name, &tuning, probe);
                if let Some(guard) = probe_guard.take() {
                    guard.disarm();
                }
                let outcome_label = match failure {
                    InvokeFailure::TimedOut(_) => "timeout",
                    InvokeFailure::Failed(_) => "failure",
                };
                metrics::record_execution(name, outcome_label, elapsed);
                Err(match failure {
                    InvokeFailure::TimedOut(after) => ResilienceError::TimedOut {
                        operation: name.to_string(),
                        after,
                    },
                    InvokeFailure::Failed(e) => ResilienceError::Failed {
                        operation: name.to_string(),
                        exit_signal: e.exit_signal,
                        message: e.message,
                    },
                })
            }
        }
    }

    /// Current state for `name`. Never creates a record.
    pub fn status(&self, name: &str) -> CircuitSnapshot {
        self.records
            .get(name)
            .map(|record| self.snapshot(&record))
            .unwrap_or_default()
    }

    /// Force `name` back to Closed with no failure history.
    pub fn reset(&self, name: &str) {
        if let Some(mut record) = self.records.get_mut(name) {
            let previous = record.state;
            *record = CircuitRecord {
                probe_generation: record.probe_generation,
                ..CircuitRecord::default()
            };
            tracing::info!(operation = %name, previous = %previous, "Circuit manually reset");
            if previous != CircuitState::Closed {
                metrics::record_transition(name, previous, CircuitState::Closed);
            }
        }
    }

    /// All known circuits, sorted by name.
    pub fn snapshot_all(&self) -> Vec<(String, CircuitSnapshot)> {
        let mut all: Vec<_> = self
            .records
            .iter()
            .map(|entry| (entry.key().clone(), self.snapshot(entry.value())))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn snapshot(&self, record: &CircuitRecord) -> CircuitSnapshot {
        CircuitSnapshot {
            state: record.state,
            failure_count: record.failure_count,
            last_failure: record
                .last_failure
                .map(|at| at.saturating_duration_since(self.epoch)),
        }
    }

    /// Decide whether a call may proceed. Returns the probe token when the
    /// call is the Half-Open probe.
    fn admit(&self, name: &str, tuning: &BreakerTuning) -> ResilienceResult<Option<u64>> {
        let now = Instant::now();
        let mut record = self.records.entry(name.to_string()).or_default();
        let state = record.state;

        match state {
            CircuitState::Closed => Ok(None),
            CircuitState::Open => {
                let elapsed = record
                    .last_failure
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(Duration::MAX);
                if elapsed < tuning.reset_timeout {
                    let retry_after = tuning.reset_timeout - elapsed;
                    drop(record);
                    tracing::debug!(
                        operation = %name,
                        retry_after_secs = retry_after.as_secs_f64(),
                        "Circuit open, rejecting call"
                    );
                    metrics::record_rejection(name);
                    return Err(ResilienceError::CircuitOpen {
                        operation: name.to_string(),
                        retry_after,
                    });
                }
                record.state = CircuitState::HalfOpen;
                let token = record.start_probe();
                drop(record);
                tracing::info!(operation = %name, "Circuit half-open, probing");
                metrics::record_transition(name, CircuitState::Open, CircuitState::HalfOpen);
                Ok(Some(token))
            }
            CircuitState::HalfOpen if record.probe.is_some() => {
                drop(record);
                tracing::debug!(operation = %name, "Probe already in flight, rejecting call");
                metrics::record_rejection(name);
                Err(ResilienceError::CircuitOpen {
                    operation: name.to_string(),
                    retry_after: Duration::ZERO,
                })
            }
            CircuitState::HalfOpen => Ok(Some(record.start_probe())),
        }
    }

    /// Whether `probe` is the token of the probe now in flight.
    fn settles_probe(record: &CircuitRecord, probe: Option<u64>) -> bool {
        record.probe.is_some() && record.probe == probe
    }

    fn record_success(&self, name: &str, probe: Option<u64>) {
        let mut record = self.records.entry(name.to_string()).or_default();
        let previous = record.state;
        record.failure_count = 0;
        if record.probe.is_some() && !Self::settles_probe(&record, probe) {
            // Another caller owns the probe; only it may settle the state.
            return;
        }
        record.state = CircuitState::Closed;
        record.probe = None;
        drop(record);

        if previous != CircuitState::Closed {
            tracing::info!(operation = %name, previous = %previous, "Circuit closed after successful call");
            metrics::record_transition(name, previous, CircuitState::Closed);
        }
    }

    fn record_failure(&self, name: &str, tuning: &BreakerTuning, probe: Option<u64>) {
        let mut record = self.records.entry(name.to_string()).or_default();
        let previous = record.state;
        record.failure_count = record.failure_count.saturating_add(1);
        record.last_failure = Some(Instant::now());
        let failures = record.failure_count;

        if record.probe.is_some() && !Self::settles_probe(&record, probe) {
            drop(record);
            tracing::warn!(
                operation = %name,
                failure_count = failures,
                "Operation failed while a probe is in flight"
            );
            return;
        }
        if Self::settles_probe(&record, probe) || failures >= tuning.failure_threshold {
            record.state = CircuitState::Open;
        }
        record.probe = None;
        let state = record.state;
        drop(record);

        tracing::warn!(
            operation = %name,
            failure_count = failures,
            failure_threshold = tuning.failure_threshold,
            state = %state,
            "Operation failed"
        );
        if state != previous {
            tracing::error!(
                operation = %name,
                reset_timeout_secs = tuning.reset_timeout.as_secs(),
                "Circuit opened"
            );
            metrics::record_transition(name, previous, state);
        }
    }

    /// A probe future was dropped before it settled.
    fn abandon_probe(&self, name: &str, token: u64) {
        if let Some(mut record) = self.records.get_mut(name) {
            if record.state == CircuitState::HalfOpen && record.probe == Some(token) {
                record.state = CircuitState::Open;
                record.probe = None;
                drop(record);
                tracing::warn!(operation = %name, "Probe abandoned, circuit re-opened");
                metrics::record_transition(name, CircuitState::HalfOpen, CircuitState::Open);
            }
        }
    }
}

impl CircuitRecord {
    fn start_probe(&mut self) -> u64 {
        self.probe_generation = self.probe_generation.wrapping_add(1);
        self.probe = Some(self.probe_generation);
        self.probe_generation
    }
}

/// Re-opens the circuit if a Half-Open probe is cancelled mid-flight.
struct ProbeGuard<'a> {
    registry: &'a CircuitBreakerRegistry,
    name: &'a str,
    token: u64,
}

impl ProbeGuard<'_> {
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.registry.abandon_probe(self.name, self.token);
    }
}
