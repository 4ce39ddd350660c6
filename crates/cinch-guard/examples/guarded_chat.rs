//! One guarded chat completion against OpenRouter.
//!
//! Routes over a small price table, marks prompt-cache breakpoints, and
//! retries transient failures through a shared circuit breaker.
//!
//! # Usage
//!
//! ```bash
//! OPENROUTER_KEY=sk-... cargo run --example guarded_chat -- balanced
//! ```

use std::sync::Arc;

use cinch_guard::OPENROUTER_URL;
use cinch_guard::prelude::*;

async fn send(
    client: &reqwest::Client,
    api_key: &str,
    body: &ChatRequest,
) -> Result<serde_json::Value, Failure> {
    let resp = client
        .post(OPENROUTER_URL)
        .header("Authorization", format!("Bearer {api_key}"))
        .header("X-Title", "cinch-guard")
        .json(body)
        .send()
        .await?;

    let status = resp.status();
    let headers = resp.headers().clone();
    let text = resp.text().await?;
    if !status.is_success() {
        return Err(Failure::from_response(status, &headers, &text));
    }
    serde_json::from_str(&text).map_err(|e| Failure::from(format!("failed to parse response: {e}")))
}

#[tokio::main]
async fn main() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter("cinch_guard=debug")
        .init();

    let api_key = std::env::var("OPENROUTER_KEY")
        .map_err(|_| "Set OPENROUTER_KEY env var to your OpenRouter API key")?;
    let profile = GuardProfile::resolve(&std::env::args().nth(1).unwrap_or("balanced".into()))?;

    // 1. Route over an externally ordered price table.
    let table = vec![
        PricedModel::new("anthropic/claude-3.5-haiku", ModelPricing::new(0.8, 4.0)),
        PricedModel::new("anthropic/claude-sonnet-4", ModelPricing::new(3.0, 15.0)),
    ];
    let breaker = Arc::new(CircuitBreaker::new(OPENROUTER_URL, profile.breaker.clone()));
    let router = ModelRouter::for_policy(&profile.retry);
    let route = router.route(&table, |_| true);

    // 2. Build the body and mark cache breakpoints.
    let mut body = ChatRequest {
        messages: vec![
            Message::system("You are a concise assistant. ".repeat(300)),
            Message::user("In two sentences, what is a circuit breaker?"),
        ],
        max_tokens: Some(256),
        ..Default::default()
    };
    router.apply(&route, &mut body);
    let marked = apply_cache_control(&mut body.messages, &profile.caching, &CharRatioEstimator::default());
    let estimated_tokens: u64 = body
        .messages
        .iter()
        .filter_map(|m| m.text())
        .map(|t| (t.chars().count() as f64 / 3.5) as u64)
        .sum();

    // 3. Send with retries.
    let client = reqwest::Client::new();
    let mut strategy = RetryStrategy::new(profile.retry.clone())
        .with_pricing(route.primary_pricing.unwrap_or_default());
    let response = execute_with_retry(&mut strategy, Some(&*breaker), Some(estimated_tokens), || {
        send(&client, &api_key, &body)
    })
    .await
    .map_err(|e| e.to_string())?;

    let text = response["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or("(no content)");
    println!("{text}");
    println!(
        "\n--- profile {} | {} cache mark(s) | ${:.4} retry spend | breaker {} ---",
        profile.name,
        marked,
        strategy.total_retry_cost(),
        breaker.state()
    );
    Ok(())
}
