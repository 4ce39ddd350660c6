//! Retry policy and the cost-aware retry strategy.
//!
//! [`RetryPolicy`] is the immutable per-profile configuration.
//! [`RetryStrategy`] owns one policy plus a [`RetryLedger`] for a single
//! logical request and answers "should attempt N be retried, and after how
//! long?". Auth and context-length failures are never retried; network
//! failures get a tighter budget than rate limits and server errors.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::backoff::{self, Backoff, JitterSource, RandomJitter};
use super::classify::{ErrorKind, classify};
use super::pricing::ModelPricing;
use crate::failure::FailureInfo;

/// Network failures are never retried more than this many times, whatever
/// `max_retries` says.
pub const NETWORK_RETRY_CAP: u32 = 3;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries (0 = no retries, just fail immediately).
    pub max_retries: u32,
    /// Delay before the first retry, before kind multipliers and jitter.
    pub base_delay_ms: u64,
    /// Cap on the computed delay (and on server retry hints).
    pub max_delay_ms: u64,
    /// Retry failures that could not be classified.
    pub retry_all_errors: bool,
    /// Refuse retries once projected spend crosses `max_cost_threshold`.
    pub cost_aware_retry: bool,
    /// Retry budget in USD for one logical request.
    pub max_cost_threshold: f64,
    /// Symmetric jitter as a fraction of the delay, in `[0, 1]`.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::balanced()
    }
}

impl RetryPolicy {
    /// Few retries, small budget. For interactive calls where failing fast
    /// beats waiting.
    pub fn conservative() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            retry_all_errors: false,
            cost_aware_retry: true,
            max_cost_threshold: 0.10,
            jitter_factor: 0.1,
        }
    }

    pub fn balanced() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            retry_all_errors: false,
            cost_aware_retry: true,
            max_cost_threshold: 0.50,
            jitter_factor: 0.2,
        }
    }

    /// Many retries, unknown errors included, no spend limit. For batch
    /// jobs where completion matters more than latency.
    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 500,
            max_delay_ms: 60_000,
            retry_all_errors: true,
            cost_aware_retry: false,
            max_cost_threshold: 5.0,
            jitter_factor: 0.3,
        }
    }

    /// Balanced defaults with the given number of retries.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// Set both delay bounds. `max` is raised to `base` if smaller.
    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay_ms = base.as_millis() as u64;
        self.max_delay_ms = (max.as_millis() as u64).max(self.base_delay_ms);
        self
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Enable cost-aware retries with the given USD budget.
    pub fn with_cost_limit(mut self, max_cost_usd: f64) -> Self {
        self.cost_aware_retry = true;
        self.max_cost_threshold = max_cost_usd;
        self
    }

    pub fn with_retry_all_errors(mut self, retry_all: bool) -> Self {
        self.retry_all_errors = retry_all;
        self
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms))
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.base_delay(), self.max_delay(), self.jitter_factor)
    }

    /// Check the invariants a loaded policy must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_delay_ms < self.base_delay_ms {
            return Err(format!(
                "max_delay_ms ({}) must be >= base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(format!(
                "jitter_factor must be within [0, 1], got {}",
                self.jitter_factor
            ));
        }
        if !self.max_cost_threshold.is_finite() || self.max_cost_threshold < 0.0 {
            return Err(format!(
                "max_cost_threshold must be a non-negative amount, got {}",
                self.max_cost_threshold
            ));
        }
        Ok(())
    }
}

/// Whether a failure of `kind` may be retried after `attempt` retries have
/// already been made.
pub fn is_retryable(kind: ErrorKind, attempt: u32, max_retries: u32, policy: &RetryPolicy) -> bool {
    check_eligibility(kind, attempt, max_retries, policy.retry_all_errors).is_ok()
}

/// Same rules as [`is_retryable`], with a denial reason.
fn check_eligibility(
    kind: ErrorKind,
    attempt: u32,
    max_retries: u32,
    retry_all_errors: bool,
) -> Result<(), String> {
    if attempt >= max_retries {
        return Err(format!(
            "retry limit reached for {kind} ({attempt}/{max_retries})"
        ));
    }
    match kind {
        ErrorKind::AuthError | ErrorKind::ContextLengthError => {
            Err(format!("{kind} is not retryable"))
        }
        ErrorKind::RateLimit | ErrorKind::ServerError => Ok(()),
        ErrorKind::NetworkError => {
            let cap = max_retries.min(NETWORK_RETRY_CAP);
            if attempt < cap {
                Ok(())
            } else {
                Err(format!("retry limit reached for {kind} ({attempt}/{cap})"))
            }
        }
        ErrorKind::Unknown => {
            if retry_all_errors {
                Ok(())
            } else {
                Err(format!(
                    "{kind} is not retryable (retry_all_errors disabled)"
                ))
            }
        }
    }
}

/// The outcome of [`RetryStrategy::should_retry`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryDecision {
    pub retry: bool,
    /// How long to wait before the next attempt. Zero when denied.
    pub delay: Duration,
    pub reason: String,
    /// How the failure was classified.
    pub kind: ErrorKind,
    /// USD this decision added to the ledger.
    pub charged: f64,
}

impl RetryDecision {
    fn deny(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            retry: false,
            delay: Duration::ZERO,
            reason: reason.into(),
            kind,
            charged: 0.0,
        }
    }
}

/// Spend and retry count for one logical request.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RetryLedger {
    /// USD charged against the retry budget. Only grows while cost-aware
    /// retries are granted; shrinks only when a granted retry is refunded.
    pub accumulated_cost: f64,
    pub retries_granted: u32,
}

/// Caller-supplied veto evaluated before anything else.
pub type RetryCondition = Box<dyn Fn(&dyn FailureInfo, u32) -> bool + Send + Sync>;

/// Per-request retry orchestrator.
///
/// Create one per user-visible request and call [`should_retry`](Self::should_retry)
/// after each failed attempt. The ledger carries over between calls until
/// [`reset_cost`](Self::reset_cost) is invoked.
///
/// # Example
///
/// ```
/// use cinch_guard::api::{ModelPricing, RetryPolicy, RetryStrategy};
/// use cinch_guard::failure::Failure;
///
/// let policy = RetryPolicy::with_retries(3).with_cost_limit(0.10);
/// let mut strategy = RetryStrategy::new(policy).with_pricing(ModelPricing::new(3.0, 15.0));
///
/// let failure = Failure::new().with_status(429);
/// let decision = strategy.should_retry(&failure, 0, Some(1_000_000));
/// assert!(!decision.retry);
/// assert!(decision.reason.contains("cost threshold exceeded"));
/// ```
pub struct RetryStrategy {
    policy: RetryPolicy,
    pricing: Option<ModelPricing>,
    condition: Option<RetryCondition>,
    jitter: Box<dyn JitterSource>,
    ledger: RetryLedger,
}

impl RetryStrategy {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            pricing: None,
            condition: None,
            jitter: Box::new(RandomJitter),
            ledger: RetryLedger::default(),
        }
    }

    /// Price of the model being called, for cost-aware retries.
    pub fn with_pricing(mut self, pricing: ModelPricing) -> Self {
        self.pricing = Some(pricing);
        self
    }

    /// Veto retries with a custom predicate over the failure and attempt.
    pub fn with_condition(
        mut self,
        condition: impl Fn(&dyn FailureInfo, u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.condition = Some(Box::new(condition));
        self
    }

    /// Replace the random jitter source.
    pub fn with_jitter_source(mut self, jitter: impl JitterSource + 'static) -> Self {
        self.jitter = Box::new(jitter);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn ledger(&self) -> RetryLedger {
        self.ledger
    }

    /// Total USD charged against the retry budget so far.
    pub fn total_retry_cost(&self) -> f64 {
        self.ledger.accumulated_cost
    }

    /// Start a new logical request: clears spend and the retry count.
    pub fn reset_cost(&mut self) {
        self.ledger = RetryLedger::default();
    }

    /// Take back a granted retry that was never sent: its charge leaves the
    /// ledger and it stops counting as granted. Denials are ignored.
    pub fn refund(&mut self, decision: &RetryDecision) {
        if !decision.retry {
            return;
        }
        self.ledger.accumulated_cost = (self.ledger.accumulated_cost - decision.charged).max(0.0);
        self.ledger.retries_granted = self.ledger.retries_granted.saturating_sub(1);
        debug!(
            refunded_usd = decision.charged,
            "Refunded unsent {} retry",
            decision.kind
        );
    }

    /// Decide whether to retry after a failed attempt.
    ///
    /// `attempt` is the number of retries already made (0 after the first
    /// failure). `estimated_tokens` is the projected input size of the next
    /// attempt, used only in cost-aware mode.
    pub fn should_retry(
        &mut self,
        failure: &dyn FailureInfo,
        attempt: u32,
        estimated_tokens: Option<u64>,
    ) -> RetryDecision {
        self.should_retry_at(failure, attempt, estimated_tokens, Utc::now())
    }

    /// [`should_retry`](Self::should_retry) with an explicit clock for
    /// interpreting absolute retry hints.
    pub fn should_retry_at(
        &mut self,
        failure: &dyn FailureInfo,
        attempt: u32,
        estimated_tokens: Option<u64>,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        let kind = classify(failure);

        if let Some(condition) = &self.condition
            && !condition(failure, attempt)
        {
            debug!("Retry denied for {kind} at attempt {attempt}: custom condition failed");
            return RetryDecision::deny(kind, "custom condition failed");
        }

        if let Err(reason) = check_eligibility(
            kind,
            attempt,
            self.policy.max_retries,
            self.policy.retry_all_errors,
        ) {
            debug!("Retry denied at attempt {attempt}: {reason}");
            return RetryDecision::deny(kind, reason);
        }

        let mut charged = 0.0;
        if self.policy.cost_aware_retry
            && let (Some(pricing), Some(tokens)) = (&self.pricing, estimated_tokens)
        {
            let cost = pricing.estimate_cost(tokens, 0);
            let projected = self.ledger.accumulated_cost + cost;
            if projected > self.policy.max_cost_threshold {
                let reason = format!(
                    "cost threshold exceeded: ${:.4} spent + ${cost:.4} for this attempt > ${:.4} limit",
                    self.ledger.accumulated_cost, self.policy.max_cost_threshold,
                );
                debug!("Retry denied for {kind} at attempt {attempt}: {reason}");
                return RetryDecision::deny(kind, reason);
            }
            self.ledger.accumulated_cost = projected;
            charged = cost;
        }

        let hint = backoff::retry_hint(failure, now);
        let delay = self
            .policy
            .backoff()
            .delay(attempt, kind, hint, self.jitter.as_mut());
        self.ledger.retries_granted += 1;

        let reason = format!("retrying {kind} with {}ms", delay.as_millis());
        debug!(
            retry_hint = ?hint,
            spent_usd = self.ledger.accumulated_cost,
            "Retry granted at attempt {attempt}: {reason}"
        );
        RetryDecision {
            retry: true,
            delay,
            reason,
            kind,
            charged,
        }
    }
}

impl fmt::Debug for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryStrategy")
            .field("policy", &self.policy)
            .field("pricing", &self.pricing)
            .field("has_condition", &self.condition.is_some())
            .field("ledger", &self.ledger)
            .finish()
    }
}
