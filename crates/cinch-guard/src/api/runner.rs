//! Async retry loop wiring the breaker gate, the call, and the strategy.

use std::future::Future;

use tracing::{debug, warn};

use super::breaker::CircuitBreaker;
use super::classify::ErrorKind;
use super::retry::{RetryDecision, RetryStrategy};
use crate::failure::FailureInfo;

/// Terminal outcome of [`execute_with_retry`].
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    /// The breaker refused the next attempt.
    #[error(
        "backend unavailable: circuit breaker for {endpoint} is open after {attempts} attempt(s) (retry spend ${total_cost:.4})"
    )]
    CircuitOpen {
        endpoint: String,
        /// Failure from the last attempt made. `None` when the breaker
        /// refused before the backend was ever called.
        last_failure: Option<E>,
        attempts: u32,
        total_cost: f64,
    },

    /// The last attempt failed and the strategy denied another retry.
    #[error(
        "request failed after {attempts} attempt(s) with {kind} (retry spend ${total_cost:.4}): {reason}"
    )]
    Exhausted {
        /// The original failure from the final attempt.
        failure: E,
        kind: ErrorKind,
        attempts: u32,
        total_cost: f64,
        reason: String,
    },
}

impl<E> GuardError<E> {
    /// The backend failure, if the backend was reached at all.
    pub fn failure(&self) -> Option<&E> {
        match self {
            GuardError::CircuitOpen { last_failure, .. } => last_failure.as_ref(),
            GuardError::Exhausted { failure, .. } => Some(failure),
        }
    }

    pub fn into_failure(self) -> Option<E> {
        match self {
            GuardError::CircuitOpen { last_failure, .. } => last_failure,
            GuardError::Exhausted { failure, .. } => Some(failure),
        }
    }

    /// Backend calls made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            GuardError::CircuitOpen { attempts, .. } | GuardError::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Build the refusal for a closed gate. A retry granted for `pending` was
/// never sent, so it is refunded before the spend is reported.
fn circuit_open<E>(
    breaker: &CircuitBreaker,
    strategy: &mut RetryStrategy,
    pending: Option<(E, RetryDecision)>,
    attempts: u32,
) -> GuardError<E> {
    warn!(
        "Circuit for {} is open, failing fast without calling the backend",
        breaker.endpoint()
    );
    let last_failure = pending.map(|(failure, decision)| {
        strategy.refund(&decision);
        failure
    });
    GuardError::CircuitOpen {
        endpoint: breaker.endpoint().to_string(),
        last_failure,
        attempts,
        total_cost: strategy.total_retry_cost(),
    }
}

/// Run `call` until it succeeds, the strategy denies a retry, or the
/// breaker refuses an attempt.
///
/// Every attempt is reported to `breaker` when one is given. When the
/// breaker refuses a retry the strategy already granted, that retry is
/// refunded and the failure behind it comes back in
/// [`GuardError::CircuitOpen`].
///
/// Waits between attempts with `tokio::time::sleep`, so dropping the
/// returned future between attempts abandons the loop cleanly.
///
/// # Example
///
/// ```ignore
/// let breaker = Arc::new(CircuitBreaker::new("openrouter", BreakerConfig::balanced()));
/// let mut strategy = RetryStrategy::new(RetryPolicy::balanced())
///     .with_pricing(ModelPricing::new(3.0, 15.0));
///
/// let completion = execute_with_retry(&mut strategy, Some(&*breaker), Some(12_000), || {
///     client.chat(&body)
/// })
/// .await?;
/// ```
pub async fn execute_with_retry<T, E, F, Fut>(
    strategy: &mut RetryStrategy,
    breaker: Option<&CircuitBreaker>,
    estimated_tokens: Option<u64>,
    mut call: F,
) -> Result<T, GuardError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: FailureInfo,
{
    let mut attempt = 0;
    // Failure and grant behind the retry about to be sent.
    let mut pending: Option<(E, RetryDecision)> = None;
    loop {
        if let Some(breaker) = breaker
            && !breaker.allow_request()
        {
            return Err(circuit_open(breaker, strategy, pending.take(), attempt));
        }

        match call().await {
            Ok(value) => {
                if let Some(breaker) = breaker {
                    breaker.record_success();
                }
                if attempt > 0 {
                    debug!("Request succeeded after {} retries", attempt);
                }
                return Ok(value);
            }
            Err(err) => {
                if let Some(breaker) = breaker {
                    breaker.record_failure();
                }

                let decision = strategy.should_retry(&err, attempt, estimated_tokens);
                if !decision.retry {
                    return Err(GuardError::Exhausted {
                        failure: err,
                        kind: decision.kind,
                        attempts: attempt + 1,
                        total_cost: strategy.total_retry_cost(),
                        reason: decision.reason,
                    });
                }
                attempt += 1;

                // Don't sleep toward a retry the breaker will refuse.
                if let Some(breaker) = breaker
                    && !breaker.allow_request()
                {
                    return Err(circuit_open(breaker, strategy, Some((err, decision)), attempt));
                }

                warn!(
                    "Transient API error (attempt {}/{}): {}. Retrying in {:?}...",
                    attempt,
                    strategy.policy().max_retries,
                    decision.kind,
                    decision.delay,
                );
                tokio::time::sleep(decision.delay).await;
                pending = Some((err, decision));
            }
        }
    }
}
