//! Circuit breaker shared by every request to one backend endpoint.
//!
//! ```text
//! Closed   --(consecutive failures >= threshold)-->  Open
//! Open     --(gate check after recovery timeout)-->  HalfOpen
//! HalfOpen --(success)-->                            Closed
//! HalfOpen --(failure)-->                            Open
//! ```
//!
//! Callers report the outcome of every real network attempt; the breaker
//! never probes on its own. While half-open every caller is admitted until
//! one of them reports a result.
//!
//! The breaker is `Send + Sync`. Construct one per endpoint and share it
//! through an `Arc`. All state lives behind a single mutex held only for the
//! duration of a read or a transition.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Failure threshold reached; requests fail fast.
    Open,
    /// Recovery timeout elapsed; trial requests are admitted.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit. Must be > 0.
    pub failure_threshold: u32,
    /// Time after the last failure before a trial request is admitted.
    pub recovery_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::balanced()
    }
}

impl BreakerConfig {
    pub fn conservative() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout_ms: 60_000,
        }
    }

    pub fn balanced() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
        }
    }

    pub fn aggressive() -> Self {
        Self {
            failure_threshold: 10,
            recovery_timeout_ms: 15_000,
        }
    }

    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout_ms: recovery_timeout.as_millis() as u64,
        }
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".into());
        }
        Ok(())
    }
}

/// Point-in-time copy of the breaker's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure: Option<Instant>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// Consecutive-failure circuit breaker for one endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    endpoint: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
            }),
        }
    }

    /// The endpoint (or provider) this breaker guards.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Gate check before issuing a request.
    ///
    /// May move `Open` to `HalfOpen` once the recovery timeout has elapsed.
    /// Never touches the failure counter.
    pub fn allow_request(&self) -> bool {
        self.allow_request_at(Instant::now())
    }

    /// [`allow_request`](Self::allow_request) evaluated at `now`.
    pub fn allow_request_at(&self, now: Instant) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map_or(Duration::MAX, |at| now.saturating_duration_since(at));
                if elapsed >= self.config.recovery_timeout() {
                    inner.state = CircuitState::HalfOpen;
                    info!(
                        "Circuit for {} half-open after {:.1}s, admitting trial requests",
                        self.endpoint,
                        elapsed.as_secs_f64(),
                    );
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Report a successful attempt: resets the counter and closes the circuit.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!("Circuit for {} closed after successful request", self.endpoint);
        }
        inner.consecutive_failures = 0;
        inner.state = CircuitState::Closed;
    }

    /// Report a failed attempt.
    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    /// [`record_failure`](Self::record_failure) stamped at `now`.
    pub fn record_failure_at(&self, now: Instant) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(now);

        let threshold = self.config.failure_threshold.max(1);
        if inner.consecutive_failures >= threshold {
            if inner.state != CircuitState::Open {
                warn!(
                    "Circuit for {} opened after {} consecutive failure(s) (was {}), \
                     rejecting requests for {:?}",
                    self.endpoint,
                    inner.consecutive_failures,
                    inner.state,
                    self.config.recovery_timeout(),
                );
            }
            inner.state = CircuitState::Open;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_failure: inner.last_failure,
        }
    }

    /// Forget all history and return to `Closed`.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.last_failure = None;
    }

    // Every critical section leaves `Inner` consistent, so a poisoned lock
    // is still safe to use.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
