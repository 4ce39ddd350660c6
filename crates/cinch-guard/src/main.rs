//! Inspect and exercise guard decisions from the command line.
//!
//! # Examples
//!
//! ```sh
//! # How would a failure be classified, and would it be retried?
//! cinch-guard classify --status 429 --header retry-after=20
//!
//! # Backoff schedule for server errors under the conservative profile
//! cinch-guard backoff --profile conservative --kind server_error
//!
//! # Cost of one attempt
//! cinch-guard cost --input 12000 --output 800 --input-price 3 --output-price 15
//!
//! # Mark cache breakpoints on a conversation
//! cinch-guard cache --profile aggressive --file messages.json
//!
//! # Dump a preset, or validate a profile file
//! cinch-guard profile balanced
//! cinch-guard profile ./my-profile.json
//!
//! # 20 concurrent requests against one shared breaker
//! cinch-guard simulate --requests 20 --failure-rate 0.4
//! ```

use std::io::{self, Read};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use cinch_guard::api::backoff::{self, FixedJitter};
use cinch_guard::api::{
    CircuitBreaker, ErrorKind, GuardError, ModelPricing, RetryStrategy, classify, estimate_cost,
    is_retryable,
};
use cinch_guard::cache::{CharRatioEstimator, apply_cache_control};
use cinch_guard::config::GuardProfile;
use cinch_guard::failure::Failure;
use cinch_guard::{Message, OPENROUTER_URL};
use clap::{Parser, Subcommand};
use rand::Rng;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Retry, circuit-breaker, cost, and prompt-cache decisions for OpenRouter
/// requests.
#[derive(Parser)]
#[command(name = "cinch-guard")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify a failure and report whether it would be retried
    Classify {
        /// HTTP status code
        #[arg(long)]
        status: Option<u16>,

        /// Error message text
        #[arg(long)]
        message: Option<String>,

        /// Response header as name=value (repeatable)
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Network error code, e.g. ECONNRESET
        #[arg(long)]
        network_code: Option<String>,

        /// Retries already made
        #[arg(long, default_value_t = 0)]
        attempt: u32,

        /// Preset name or path to a profile JSON file
        #[arg(long, default_value = "balanced")]
        profile: String,
    },

    /// Print the un-jittered backoff schedule for an error kind
    Backoff {
        #[arg(long, default_value = "balanced")]
        profile: String,

        /// rate_limit, server_error, network_error, ...
        #[arg(long, default_value = "server_error")]
        kind: ErrorKind,

        /// Number of attempts to show (defaults to the profile's max_retries)
        #[arg(long)]
        attempts: Option<u32>,
    },

    /// Estimate the USD cost of one attempt
    Cost {
        /// Input (prompt) tokens
        #[arg(long)]
        input: u64,

        /// Output (completion) tokens
        #[arg(long, default_value_t = 0)]
        output: u64,

        /// USD per million input tokens
        #[arg(long, default_value_t = 0.0)]
        input_price: f64,

        /// USD per million output tokens
        #[arg(long, default_value_t = 0.0)]
        output_price: f64,

        /// OpenRouter model metadata JSON file; overrides the price flags
        #[arg(long)]
        model_file: Option<String>,
    },

    /// Mark cache breakpoints on a JSON array of messages
    Cache {
        #[arg(long, default_value = "balanced")]
        profile: String,

        /// Messages file (reads stdin when omitted)
        #[arg(long)]
        file: Option<String>,
    },

    /// Print a resolved profile as JSON
    Profile {
        /// Preset name or path to a profile JSON file
        #[arg(default_value = "balanced")]
        name: String,
    },

    /// Print the JSON Schema for profile files
    Schema,

    /// Run concurrent simulated requests against one shared breaker
    Simulate {
        #[arg(long, default_value = "balanced")]
        profile: String,

        /// Number of concurrent logical requests
        #[arg(long, default_value_t = 10)]
        requests: usize,

        /// Probability that any single attempt fails with a 503
        #[arg(long, default_value_t = 0.3)]
        failure_rate: f64,

        /// Multiplier applied to the profile's delays
        #[arg(long, default_value_t = 0.01)]
        delay_scale: f64,

        /// Estimated tokens per attempt, for cost-aware profiles
        #[arg(long, default_value_t = 8_000)]
        tokens: u64,
    },
}

// ── Helpers ────────────────────────────────────────────────────────

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("header '{raw}' must be name=value"))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn read_input(file: Option<&str>) -> Result<String, String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read '{path}': {e}")),
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| format!("failed to read stdin: {e}"))?;
            Ok(buf)
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("failed to serialize output: {e}"))
}

// ── Subcommands ────────────────────────────────────────────────────

fn run_classify(
    failure: Failure,
    attempt: u32,
    profile: &GuardProfile,
) -> Result<(), String> {
    let kind = classify(&failure);
    let policy = &profile.retry;
    let retryable = is_retryable(kind, attempt, policy.max_retries, policy);
    let hint = backoff::retry_hint(&failure, chrono::Utc::now());

    println!("kind:      {kind}");
    println!("retryable: {retryable} (attempt {attempt}, profile {})", profile.name);
    if let Some(hint) = hint {
        println!("hint:      {}ms", hint.as_millis());
    }
    if retryable {
        let delay = policy
            .backoff()
            .delay(attempt, kind, hint, &mut FixedJitter(0.0));
        println!("delay:     {}ms (before jitter)", delay.as_millis());
    }
    Ok(())
}

fn run_backoff(profile: &GuardProfile, kind: ErrorKind, attempts: Option<u32>) {
    let policy = &profile.retry;
    let backoff = policy.backoff();
    let attempts = attempts.unwrap_or(policy.max_retries);
    let spread = policy.jitter_factor;

    println!("{kind} under '{}' (jitter ±{:.0}%)", profile.name, spread * 100.0);
    for attempt in 0..attempts {
        let delay = backoff.exponential(attempt, kind);
        let retryable = is_retryable(kind, attempt, policy.max_retries, policy);
        let ms = delay.as_millis();
        println!(
            "  attempt {attempt}: {ms:>6}ms{}",
            if retryable { "" } else { "  (not retried)" }
        );
    }
    println!("  ceiling:   {:>6}ms", backoff.ceiling().as_millis());
}

fn run_cost(
    input: u64,
    output: u64,
    input_price: f64,
    output_price: f64,
    model_file: Option<&str>,
) -> Result<(), String> {
    let pricing = match model_file {
        Some(path) => {
            let raw = read_input(Some(path))?;
            let value: serde_json::Value = serde_json::from_str(&raw)
                .map_err(|e| format!("failed to parse model file '{path}': {e}"))?;
            ModelPricing::from_openrouter_metadata(&value)
        }
        None => ModelPricing::new(input_price, output_price),
    };
    let cost = estimate_cost(Some(&pricing), input, output);
    println!(
        "${cost:.6} ({input} in @ ${}/M, {output} out @ ${}/M)",
        pricing.input_per_million, pricing.output_per_million
    );
    Ok(())
}

fn run_cache(profile: &GuardProfile, file: Option<&str>) -> Result<(), String> {
    let raw = read_input(file)?;
    let mut messages: Vec<Message> =
        serde_json::from_str(&raw).map_err(|e| format!("failed to parse messages: {e}"))?;
    let marked = apply_cache_control(
        &mut messages,
        &profile.caching,
        &CharRatioEstimator::default(),
    );
    eprintln!("{marked} cache breakpoint(s) under '{}'", profile.name);
    println!("{}", to_json(&messages)?);
    Ok(())
}

async fn run_simulate(
    profile: GuardProfile,
    requests: usize,
    failure_rate: f64,
    delay_scale: f64,
    tokens: u64,
) -> Result<(), String> {
    if !(0.0..=1.0).contains(&failure_rate) {
        return Err(format!("--failure-rate must be within [0, 1], got {failure_rate}"));
    }
    if !delay_scale.is_finite() || delay_scale < 0.0 {
        return Err(format!("--delay-scale must be non-negative, got {delay_scale}"));
    }

    let scale = |ms: u64| Duration::from_secs_f64(ms as f64 * delay_scale / 1000.0);
    let policy = profile.retry.clone().with_delays(
        scale(profile.retry.base_delay_ms),
        scale(profile.retry.max_delay_ms),
    );
    let breaker = Arc::new(CircuitBreaker::new(OPENROUTER_URL, profile.breaker.clone()));
    let pricing = ModelPricing::new(3.0, 15.0);

    info!(
        "Simulating {requests} request(s) at {:.0}% failure rate with profile '{}'",
        failure_rate * 100.0,
        profile.name
    );

    let runs = (0..requests).map(|id| {
        let breaker = Arc::clone(&breaker);
        let mut strategy = RetryStrategy::new(policy.clone()).with_pricing(pricing);
        async move {
            let mut attempts = 0u32;
            let result = cinch_guard::api::execute_with_retry(
                &mut strategy,
                Some(breaker.as_ref()),
                Some(tokens),
                || {
                    attempts += 1;
                    let fail = rand::rng().random_bool(failure_rate);
                    async move {
                        if fail {
                            Err(Failure::new()
                                .with_status(503)
                                .with_message("simulated upstream failure"))
                        } else {
                            Ok(())
                        }
                    }
                },
            )
            .await;
            (id, attempts, result, strategy.total_retry_cost())
        }
    });
    let outcomes = futures::future::join_all(runs).await;

    let (mut ok, mut exhausted, mut rejected) = (0, 0, 0);
    let mut spend = 0.0;
    for (id, attempts, result, cost) in &outcomes {
        spend += cost;
        let outcome = match result {
            Ok(()) => {
                ok += 1;
                "ok".to_string()
            }
            Err(e @ GuardError::Exhausted { .. }) => {
                exhausted += 1;
                e.to_string()
            }
            Err(e @ GuardError::CircuitOpen { .. }) => {
                rejected += 1;
                e.to_string()
            }
        };
        println!("request {id:>3}: {attempts} call(s), ${cost:.4} retry spend, {outcome}");
    }

    let snapshot = breaker.snapshot();
    println!();
    println!("succeeded: {ok}  exhausted: {exhausted}  rejected by breaker: {rejected}");
    println!("retry spend: ${spend:.4}");
    println!(
        "breaker: {} ({} consecutive failure(s))",
        snapshot.state, snapshot.consecutive_failures
    );
    Ok(())
}

async fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Classify {
            status,
            message,
            headers,
            network_code,
            attempt,
            profile,
        } => {
            let mut failure = Failure::new();
            failure.status = status;
            failure.message = message;
            failure.network_code = network_code;
            for (name, value) in headers {
                failure = failure.with_header(name, value);
            }
            run_classify(failure, attempt, &GuardProfile::resolve(&profile)?)
        }
        Command::Backoff {
            profile,
            kind,
            attempts,
        } => {
            run_backoff(&GuardProfile::resolve(&profile)?, kind, attempts);
            Ok(())
        }
        Command::Cost {
            input,
            output,
            input_price,
            output_price,
            model_file,
        } => run_cost(input, output, input_price, output_price, model_file.as_deref()),
        Command::Cache { profile, file } => {
            run_cache(&GuardProfile::resolve(&profile)?, file.as_deref())
        }
        Command::Profile { name } => {
            println!("{}", GuardProfile::resolve(&name)?.to_json_pretty()?);
            Ok(())
        }
        Command::Schema => {
            println!("{}", to_json(&GuardProfile::schema())?);
            Ok(())
        }
        Command::Simulate {
            profile,
            requests,
            failure_rate,
            delay_scale,
            tokens,
        } => {
            run_simulate(
                GuardProfile::resolve(&profile)?,
                requests,
                failure_rate,
                delay_scale,
                tokens,
            )
            .await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
