//! Request-shaping decisions made around each OpenRouter call.
//!
//! - [`classify`]: maps a failed call to an [`ErrorKind`].
//! - [`backoff`]: exponential delays with jitter and server retry hints.
//! - [`retry`]: [`RetryPolicy`] presets and the per-request [`RetryStrategy`],
//!   which adds cost-aware gating on top of classification and backoff.
//! - [`breaker`]: per-endpoint [`CircuitBreaker`] shared across requests.
//! - [`runner`]: [`execute_with_retry`], the async loop tying them together.
//! - [`pricing`]: per-model prices and the [`estimate_cost`] formula.
//! - [`router`]: [`ModelRouter`] for `models` fallback chains.

pub mod backoff;
pub mod breaker;
pub mod classify;
pub mod pricing;
pub mod retry;
pub mod router;
pub mod runner;

pub use backoff::{Backoff, FixedJitter, JitterSource, RandomJitter};
pub use breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use classify::{ErrorKind, classify};
pub use pricing::{ModelPricing, estimate_cost};
pub use retry::{RetryDecision, RetryLedger, RetryPolicy, RetryStrategy, is_retryable};
pub use router::{ModelRouter, PricedModel, Route};
pub use runner::{GuardError, execute_with_retry};
