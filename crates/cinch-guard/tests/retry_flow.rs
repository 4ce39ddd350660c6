//! End-to-end tests that drive profiles, the retry runner, the shared
//! breaker, routing, and cache marking together the way a call site would.

use std::cell::Cell;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cinch_guard::api::backoff::FixedJitter;
use cinch_guard::api::{
    CircuitBreaker, CircuitState, ErrorKind, GuardError, ModelPricing, ModelRouter, PricedModel,
    RetryPolicy, RetryStrategy, classify, execute_with_retry,
};
use cinch_guard::cache::{CharRatioEstimator, apply_cache_control};
use cinch_guard::config::{GuardProfile, ProfilePreset};
use cinch_guard::failure::Failure;
use cinch_guard::{ChatRequest, Message};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};

/// The profile's retry policy with delays shrunk to a few milliseconds.
fn fast(policy: &RetryPolicy) -> RetryPolicy {
    policy
        .clone()
        .with_delays(Duration::from_millis(1), Duration::from_millis(4))
}

// ── Retry loop ───────────────────────────────────────────────────────

#[tokio::test]
async fn balanced_profile_recovers_from_rate_limits() {
    let profile = GuardProfile::preset(ProfilePreset::Balanced);
    let breaker = CircuitBreaker::new("openrouter", profile.breaker.clone());
    let mut strategy = RetryStrategy::new(fast(&profile.retry))
        .with_pricing(ModelPricing::new(3.0, 15.0))
        .with_jitter_source(FixedJitter(0.0));

    let calls = Cell::new(0u32);
    let result: Result<&str, GuardError<Failure>> =
        execute_with_retry(&mut strategy, Some(&breaker), Some(10_000), || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n <= 2 {
                    Err(Failure::new().with_status(429).with_message("rate limited"))
                } else {
                    Ok("completion")
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "completion");
    assert_eq!(calls.get(), 3);
    // Two retries at 10k input tokens, $3/M each.
    assert!((strategy.total_retry_cost() - 0.06).abs() < 1e-9);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.consecutive_failures(), 0);
}

#[tokio::test]
async fn conservative_cost_ceiling_stops_retries() {
    let profile = GuardProfile::preset(ProfilePreset::Conservative);
    let mut strategy = RetryStrategy::new(fast(&profile.retry))
        .with_pricing(ModelPricing::new(3.0, 15.0))
        .with_jitter_source(FixedJitter(0.0));

    let calls = Cell::new(0u32);
    let result: Result<(), _> = execute_with_retry(&mut strategy, None, Some(20_000), || {
        calls.set(calls.get() + 1);
        async { Err(Failure::new().with_status(503)) }
    })
    .await;

    // $0.06 per retry against a $0.10 ceiling: one retry fits, the second
    // does not.
    match result.unwrap_err() {
        GuardError::Exhausted {
            kind,
            attempts,
            total_cost,
            reason,
            ..
        } => {
            assert_eq!(kind, ErrorKind::ServerError);
            assert_eq!(attempts, 2);
            assert!((total_cost - 0.06).abs() < 1e-9);
            assert!(reason.starts_with("cost threshold exceeded"), "{reason}");
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(calls.get(), 2);
}

#[tokio::test]
async fn aggressive_profile_retries_unknown_errors() {
    let profile = GuardProfile::preset(ProfilePreset::Aggressive);
    let mut strategy =
        RetryStrategy::new(fast(&profile.retry)).with_jitter_source(FixedJitter(0.0));

    let calls = Cell::new(0u32);
    let result: Result<u32, String> = execute_with_retry(&mut strategy, None, None, || {
        calls.set(calls.get() + 1);
        let n = calls.get();
        async move {
            if n == 1 {
                Err("something odd happened".to_string())
            } else {
                Ok(n)
            }
        }
    })
    .await
    .map_err(|e| e.to_string());

    assert_eq!(result.unwrap(), 2);
}

#[tokio::test]
async fn context_length_errors_fail_immediately() {
    let profile = GuardProfile::preset(ProfilePreset::Aggressive);
    let mut strategy = RetryStrategy::new(fast(&profile.retry));
    let calls = Cell::new(0u32);
    let result: Result<(), _> = execute_with_retry(&mut strategy, None, None, || {
        calls.set(calls.get() + 1);
        async {
            Err(Failure::new()
                .with_status(400)
                .with_message("This model's maximum context length is 200000 tokens"))
        }
    })
    .await;

    let err = result.unwrap_err();
    assert_eq!(calls.get(), 1);
    assert!(matches!(
        err,
        GuardError::Exhausted {
            kind: ErrorKind::ContextLengthError,
            attempts: 1,
            ..
        }
    ));
}

// ── Shared breaker ───────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_requests_share_one_breaker() {
    let mut profile = GuardProfile::preset(ProfilePreset::Conservative);
    profile.retry.max_retries = 0;
    let breaker = Arc::new(CircuitBreaker::new("openrouter", profile.breaker.clone()));

    let runs = (0..6).map(|_| {
        let breaker = Arc::clone(&breaker);
        let mut strategy = RetryStrategy::new(profile.retry.clone());
        async move {
            execute_with_retry(&mut strategy, Some(breaker.as_ref()), None, || async {
                Err::<(), _>(Failure::new().with_status(502))
            })
            .await
        }
    });
    let results = futures::future::join_all(runs).await;

    let exhausted = results
        .iter()
        .filter(|r| matches!(r, Err(GuardError::Exhausted { .. })))
        .count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(GuardError::CircuitOpen { .. })))
        .count();
    assert_eq!(exhausted, 3);
    assert_eq!(rejected, 3);
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[test]
fn breaker_recovers_after_timeout_and_success() {
    let profile = GuardProfile::preset(ProfilePreset::Aggressive);
    let breaker = CircuitBreaker::new("openrouter", profile.breaker.clone());
    let timeout = profile.breaker.recovery_timeout();
    let t0 = Instant::now();

    for _ in 0..profile.breaker.failure_threshold {
        assert!(breaker.allow_request_at(t0));
        breaker.record_failure_at(t0);
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.allow_request_at(t0 + timeout / 2));

    assert!(breaker.allow_request_at(t0 + timeout));
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    breaker.record_success();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

// ── HTTP failures ────────────────────────────────────────────────────

#[test]
fn http_retry_after_drives_the_delay() {
    let mut headers = HeaderMap::new();
    headers.insert("retry-after", HeaderValue::from_static("2"));
    let failure = Failure::from_response(
        StatusCode::TOO_MANY_REQUESTS,
        &headers,
        r#"{"error": {"message": "Rate limit exceeded", "code": 429}}"#,
    );
    assert_eq!(classify(&failure), ErrorKind::RateLimit);
    assert_eq!(failure.message.as_deref(), Some("Rate limit exceeded"));

    let mut strategy = RetryStrategy::new(RetryPolicy::balanced().with_jitter(0.0))
        .with_jitter_source(FixedJitter(0.0));
    let decision = strategy.should_retry(&failure, 0, None);
    assert!(decision.retry);
    assert_eq!(decision.delay, Duration::from_secs(2));
}

// ── Routing and caching ─────────────────────────────────────────────

#[test]
fn request_shaping_routes_around_open_breakers_and_marks_cache() {
    let profile = GuardProfile::preset(ProfilePreset::Balanced);
    let table = vec![
        PricedModel::new("deepseek/deepseek-chat", ModelPricing::new(0.27, 1.10)),
        PricedModel::new("anthropic/claude-3.5-haiku", ModelPricing::new(0.8, 4.0)),
        PricedModel::new("anthropic/claude-sonnet-4", ModelPricing::new(3.0, 15.0)),
    ];
    let tripped = CircuitBreaker::new("deepseek/deepseek-chat", profile.breaker.clone());
    for _ in 0..profile.breaker.failure_threshold {
        tripped.record_failure();
    }

    let router = ModelRouter::for_policy(&profile.retry);
    let route = router.route(&table, |id| id != tripped.endpoint() || tripped.allow_request());
    assert_eq!(
        route.models,
        vec!["anthropic/claude-3.5-haiku", "anthropic/claude-sonnet-4"]
    );

    let system_prompt = "You are a meticulous reviewer. ".repeat(200);
    let mut request = ChatRequest {
        messages: vec![
            Message::system(system_prompt),
            Message::user("short opener"),
            Message::assistant_text("ok"),
            Message::user("Review this diff carefully. ".repeat(150)),
        ],
        ..Default::default()
    };
    router.apply(&route, &mut request);
    let marked = apply_cache_control(
        &mut request.messages,
        &profile.caching,
        &CharRatioEstimator::default(),
    );
    assert_eq!(marked, 2);

    let json = serde_json::to_value(&request).unwrap();
    assert_eq!(json["route"], "fallback");
    assert_eq!(json["provider"]["sort"], "price");
    let messages = json["messages"].as_array().unwrap();
    assert_eq!(messages[0]["content"][0]["cache_control"]["ttl"], "1h");
    assert_eq!(messages[1]["content"], "short opener");
    assert_eq!(messages[3]["content"][0]["cache_control"]["type"], "ephemeral");
    assert_eq!(messages[3]["content"][0]["cache_control"]["ttl"], "5m");

    let strategy = RetryStrategy::new(profile.retry.clone())
        .with_pricing(route.primary_pricing.unwrap_or_default());
    assert!(format!("{strategy:?}").contains("0.8"));
}
