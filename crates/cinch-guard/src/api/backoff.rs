//! Backoff delay calculation with per-kind multipliers and symmetric jitter.
//!
//! A server-supplied retry hint always wins over the computed exponential
//! delay. Jitter is applied in both cases so that many callers rejected by
//! the same rate limit do not come back in lockstep.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use super::classify::ErrorKind;
use crate::failure::FailureInfo;

/// Response headers that may carry a retry hint, checked in order.
///
/// The second element is the unit of a relative numeric value.
pub const RETRY_HINT_HEADERS: &[(&str, HintUnit)] = &[
    ("retry-after", HintUnit::Seconds),
    ("retry-after-ms", HintUnit::Millis),
    ("x-ratelimit-reset", HintUnit::Seconds),
    ("x-ratelimit-reset-requests", HintUnit::Seconds),
    ("x-ratelimit-reset-tokens", HintUnit::Seconds),
    ("ratelimit-reset", HintUnit::Seconds),
];

/// Unit of a relative numeric retry hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintUnit {
    Seconds,
    Millis,
}

/// Source of uniform samples in `[-1, 1]` used for jitter.
pub trait JitterSource: Send {
    fn sample(&mut self) -> f64;
}

/// Jitter drawn from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn sample(&mut self) -> f64 {
        rand::rng().random_range(-1.0..=1.0)
    }
}

/// Always returns the same sample. Useful for reproducible delays.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn sample(&mut self) -> f64 {
        self.0
    }
}

/// Delay growth factor applied on top of `2^attempt` for each error kind.
pub fn kind_multiplier(kind: ErrorKind) -> f64 {
    match kind {
        ErrorKind::RateLimit => 2.0,
        ErrorKind::ServerError => 1.5,
        ErrorKind::NetworkError => 1.2,
        _ => 1.0,
    }
}

/// Exponential backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction in `[0, 1]`. Out-of-range values are clamped.
    pub jitter_factor: f64,
}

impl Backoff {
    pub fn new(base_delay: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter_factor,
        }
    }

    /// Delay before jitter: `min(max, base * 2^attempt * multiplier(kind))`.
    ///
    /// `attempt` is 0 for the first retry.
    pub fn exponential(&self, attempt: u32, kind: ErrorKind) -> Duration {
        let base_ms = self.base_delay.as_secs_f64() * 1000.0;
        let max_ms = self.max_delay.as_secs_f64() * 1000.0;
        let grown = base_ms * 2f64.powi(attempt.min(64) as i32) * kind_multiplier(kind);
        millis(grown.min(max_ms))
    }

    /// Full delay: the retry hint (capped at `max_delay`) when present,
    /// otherwise [`exponential`](Self::exponential), then jitter.
    pub fn delay(
        &self,
        attempt: u32,
        kind: ErrorKind,
        retry_hint: Option<Duration>,
        jitter: &mut dyn JitterSource,
    ) -> Duration {
        let raw = match retry_hint {
            Some(hint) => hint.min(self.max_delay),
            None => self.exponential(attempt, kind),
        };
        apply_jitter(raw, self.jitter_factor, jitter.sample())
    }

    /// Upper bound of any delay this backoff can produce.
    pub fn ceiling(&self) -> Duration {
        let factor = 1.0 + self.jitter_factor.clamp(0.0, 1.0);
        millis(self.max_delay.as_secs_f64() * 1000.0 * factor)
    }
}

/// `delay + delay * factor * sample`, floored at zero.
pub fn apply_jitter(delay: Duration, jitter_factor: f64, sample: f64) -> Duration {
    let factor = if jitter_factor.is_finite() {
        jitter_factor.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let sample = if sample.is_finite() {
        sample.clamp(-1.0, 1.0)
    } else {
        0.0
    };
    let ms = delay.as_secs_f64() * 1000.0;
    millis(ms + ms * factor * sample)
}

/// Find the first parseable retry hint among [`RETRY_HINT_HEADERS`].
pub fn retry_hint(failure: &(impl FailureInfo + ?Sized), now: DateTime<Utc>) -> Option<Duration> {
    RETRY_HINT_HEADERS.iter().find_map(|(name, unit)| {
        failure
            .header(name)
            .and_then(|value| parse_retry_hint(value, *unit, now))
    })
}

/// Interpret a retry hint value.
///
/// Numeric values larger than the current Unix time in milliseconds are
/// absolute millisecond timestamps; values larger than the current Unix time
/// in seconds are absolute second timestamps; anything smaller is a relative
/// delay in `unit`. Non-numeric values are tried as an HTTP-date. Instants
/// in the past yield zero.
pub fn parse_retry_hint(value: &str, unit: HintUnit, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(n) = value.parse::<f64>() {
        if !n.is_finite() {
            return None;
        }
        let now_ms = now.timestamp_millis() as f64;
        let now_secs = now_ms / 1000.0;
        let delay_ms = if n > now_ms {
            n - now_ms
        } else if n > now_secs {
            (n - now_secs) * 1000.0
        } else {
            match unit {
                HintUnit::Seconds => n * 1000.0,
                HintUnit::Millis => n,
            }
        };
        return Some(millis(delay_ms));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?;
    Some(
        at.with_timezone(&Utc)
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO),
    )
}

/// Whole milliseconds, floored at zero.
fn millis(ms: f64) -> Duration {
    if ms.is_nan() || ms <= 0.0 {
        Duration::ZERO
    } else {
        Duration::from_millis(ms.round() as u64)
    }
}
