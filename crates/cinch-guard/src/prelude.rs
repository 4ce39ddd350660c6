//! Convenience re-exports for common `cinch-guard` types.
//!
//! ```ignore
//! use cinch_guard::prelude::*;
//! ```
//!
//! Covers what a typical call site needs: a profile, a breaker, a retry
//! strategy, the async runner, and cache marking. Lower-level pieces
//! (backoff math, retry-hint parsing, cache candidate selection) stay in
//! their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{ChatRequest, Message, MessageRole, ProviderPreferences, ProviderSort};

// ── Failures and classification ─────────────────────────────────────
pub use crate::api::{ErrorKind, classify};
pub use crate::failure::{Failure, FailureInfo};

// ── Retry and circuit breaking ──────────────────────────────────────
pub use crate::api::{
    BreakerConfig, CircuitBreaker, CircuitState, GuardError, RetryDecision, RetryPolicy,
    RetryStrategy, execute_with_retry,
};

// ── Cost and routing ────────────────────────────────────────────────
pub use crate::api::{ModelPricing, ModelRouter, PricedModel, estimate_cost};

// ── Caching ─────────────────────────────────────────────────────────
pub use crate::cache::{CachingConfig, CharRatioEstimator, apply_cache_control, should_cache};

// ── Profiles ────────────────────────────────────────────────────────
pub use crate::config::{GuardProfile, ProfilePreset};
