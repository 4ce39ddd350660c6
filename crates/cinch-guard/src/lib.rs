//! Cost- and reliability-oriented request shaping for OpenRouter calls.
//!
//! `cinch-guard` sits between an agent loop and the
//! [OpenRouter](https://openrouter.ai/) chat completions API and decides, per
//! outgoing request, which models to target, which messages to mark for
//! prompt caching, and whether a failed call should be retried. It never
//! issues HTTP requests itself: callers keep their own client and hand the
//! failures back.
//!
//! # Getting started
//!
//! ```ignore
//! use std::sync::Arc;
//! use cinch_guard::prelude::*;
//!
//! let profile = GuardProfile::preset(ProfilePreset::Balanced);
//!
//! // One breaker per endpoint, shared by every concurrent request.
//! let breaker = Arc::new(CircuitBreaker::new("openrouter", profile.breaker.clone()));
//!
//! // One strategy per user-visible request.
//! let mut strategy = RetryStrategy::new(profile.retry.clone())
//!     .with_pricing(ModelPricing::new(3.0, 15.0));
//!
//! let mut messages = vec![
//!     Message::system(long_system_prompt),
//!     Message::user("Summarize the attached report."),
//! ];
//! apply_cache_control(&mut messages, &profile.caching, &CharRatioEstimator::default());
//!
//! let completion = execute_with_retry(&mut strategy, Some(&*breaker), Some(12_000), || {
//!     client.chat(&messages)
//! })
//! .await?;
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`api`] | Error classification, backoff, cost-aware retry strategy, circuit breaker, retry runner, model routing, pricing |
//! | [`cache`] | Prompt-cache eligibility and cache-control marking |
//! | [`failure`] | The [`FailureInfo`](failure::FailureInfo) view of a failed call and conversions from `reqwest` |
//! | [`config`] | Named presets and JSON profile files |

pub mod api;
pub mod cache;
pub mod config;
pub mod failure;
pub mod prelude;

use serde::{Deserialize, Serialize};

use cache::CacheTtl;

// ── Constants ──────────────────────────────────────────────────────

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

// ── Request types ──────────────────────────────────────────────────

/// The subset of an OpenRouter chat completion body this crate shapes.
/// Unused optional fields are omitted from serialization.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    // Model selection: `model` for a single model, or `models` + `route`
    // for a fallback chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,

    pub messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderPreferences>,
}

/// How OpenRouter should rank providers serving the same model.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderSort {
    Price,
    Throughput,
    Latency,
}

/// Provider routing preferences.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ProviderPreferences {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_fallbacks: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<ProviderSort>,
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Message content: a plain string, or typed parts when cache-control
/// markers are attached.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One block of multi-part content.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text {
            text: text.into(),
            cache_control: None,
        }
    }
}

/// The only cache-control type providers accept.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheControlType {
    Ephemeral,
}

/// Cache breakpoint marker: `{"type": "ephemeral", "ttl": "5m"}`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheControl {
    #[serde(rename = "type")]
    pub control_type: CacheControlType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<CacheTtl>,
}

impl CacheControl {
    pub fn ephemeral(ttl: CacheTtl) -> Self {
        Self {
            control_type: CacheControlType::Ephemeral,
            ttl: Some(ttl),
        }
    }
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_text(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_text(MessageRole::User, content)
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self::with_text(MessageRole::Assistant, content)
    }

    fn with_text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Text(content.into())),
        }
    }

    /// The message's text. Multi-part content is joined with newlines.
    pub fn text(&self) -> Option<String> {
        match self.content.as_ref()? {
            MessageContent::Text(text) => Some(text.clone()),
            MessageContent::Parts(parts) => Some(
                parts
                    .iter()
                    .map(|ContentPart::Text { text, .. }| text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
        }
    }

    /// Whether any part of this message carries a cache-control marker.
    pub fn is_cache_marked(&self) -> bool {
        matches!(
            &self.content,
            Some(MessageContent::Parts(parts))
                if parts.iter().any(|ContentPart::Text { cache_control, .. }| cache_control.is_some())
        )
    }
}
