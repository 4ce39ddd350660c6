//! Prompt-cache eligibility and cache-control marking.
//!
//! Providers that support prompt caching (Anthropic and Gemini via
//! OpenRouter) only reuse blocks above a minimum size, and each marked block
//! costs a write premium. This module decides which messages are worth
//! marking: the system prompt plus the tail of the conversation, since the
//! most recent user turn is the part most likely to be resent verbatim on
//! the next round.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CacheControl, ContentPart, Message, MessageContent, MessageRole};

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Providers accept at most this many cache breakpoints per request.
pub const MAX_CACHE_BREAKPOINTS: usize = 4;

/// Token counter used for the size threshold.
pub trait TokenEstimator {
    fn estimate_tokens(&self, text: &str) -> usize;
}

impl<F: Fn(&str) -> usize> TokenEstimator for F {
    fn estimate_tokens(&self, text: &str) -> usize {
        self(text)
    }
}

/// Estimates tokens as `chars / chars_per_token`, rounded down.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    pub chars_per_token: f64,
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate_tokens(&self, text: &str) -> usize {
        let cpt = if self.chars_per_token > 0.0 {
            self.chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        (text.chars().count() as f64 / cpt) as usize
    }
}

/// Lifetime of a cache entry on the provider side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum CacheTtl {
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "1h")]
    OneHour,
}

/// What kind of content a cache breakpoint covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCategory {
    SystemPrompt,
    ConversationTurn,
}

/// TTL per content category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CacheTtls {
    pub system_prompt: CacheTtl,
    pub conversation_turn: CacheTtl,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            system_prompt: CacheTtl::OneHour,
            conversation_turn: CacheTtl::FiveMinutes,
        }
    }
}

impl CacheTtls {
    pub fn for_category(&self, category: CacheCategory) -> CacheTtl {
        match category {
            CacheCategory::SystemPrompt => self.system_prompt,
            CacheCategory::ConversationTurn => self.conversation_turn,
        }
    }
}

/// Caching strategy for a call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CachingConfig {
    /// Blocks estimated below this many tokens are never marked.
    pub min_tokens_for_caching: usize,
    /// Mark the two most recent user turns instead of one.
    pub aggressive_caching: bool,
    pub ttls: CacheTtls,
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self::balanced()
    }
}

impl CachingConfig {
    pub fn conservative() -> Self {
        Self {
            min_tokens_for_caching: 2048,
            aggressive_caching: false,
            ttls: CacheTtls {
                system_prompt: CacheTtl::FiveMinutes,
                conversation_turn: CacheTtl::FiveMinutes,
            },
        }
    }

    pub fn balanced() -> Self {
        Self {
            min_tokens_for_caching: 1024,
            aggressive_caching: false,
            ttls: CacheTtls::default(),
        }
    }

    pub fn aggressive() -> Self {
        Self {
            min_tokens_for_caching: 512,
            aggressive_caching: true,
            ttls: CacheTtls {
                system_prompt: CacheTtl::OneHour,
                conversation_turn: CacheTtl::OneHour,
            },
        }
    }

    pub fn with_min_tokens(mut self, min_tokens: usize) -> Self {
        self.min_tokens_for_caching = min_tokens;
        self
    }

    /// Number of trailing user turns considered for caching.
    pub fn user_turns_to_cache(&self) -> usize {
        if self.aggressive_caching { 2 } else { 1 }
    }
}

/// Whether `content` is large enough to be worth caching, using the
/// default [`CharRatioEstimator`]. Absent or empty content never caches.
pub fn should_cache(content: Option<&str>, config: &CachingConfig) -> bool {
    should_cache_with(content, config, &CharRatioEstimator::default())
}

/// [`should_cache`] with a caller-supplied token estimator.
pub fn should_cache_with(
    content: Option<&str>,
    config: &CachingConfig,
    estimator: &dyn TokenEstimator,
) -> bool {
    match content {
        Some(text) if !text.is_empty() => {
            estimator.estimate_tokens(text) >= config.min_tokens_for_caching
        }
        _ => false,
    }
}

/// A message selected for a cache breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheCandidate {
    pub index: usize,
    pub category: CacheCategory,
}

/// Pick the messages to mark: the first system message and the most recent
/// one (or two, when aggressive) user turns, each kept only if it clears the
/// size threshold on its own. Returned in message order.
pub fn select_cache_candidates(
    messages: &[Message],
    config: &CachingConfig,
    estimator: &dyn TokenEstimator,
) -> Vec<CacheCandidate> {
    let eligible = |msg: &Message| should_cache_with(msg.text().as_deref(), config, estimator);

    let mut candidates = Vec::new();

    if let Some((index, _)) = messages
        .iter()
        .enumerate()
        .find(|(_, m)| m.role == MessageRole::System)
        .filter(|&(_, m)| eligible(m))
    {
        candidates.push(CacheCandidate {
            index,
            category: CacheCategory::SystemPrompt,
        });
    }

    let mut user_turns: Vec<CacheCandidate> = messages
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, m)| m.role == MessageRole::User)
        .take(config.user_turns_to_cache())
        .filter(|&(_, m)| eligible(m))
        .map(|(index, _)| CacheCandidate {
            index,
            category: CacheCategory::ConversationTurn,
        })
        .collect();
    user_turns.reverse();
    candidates.extend(user_turns);

    candidates.truncate(MAX_CACHE_BREAKPOINTS);
    candidates
}

/// Mark the selected messages with an ephemeral cache-control block.
///
/// Plain-text content is converted to a single text part so the marker can
/// be attached; for multi-part content the last part carries it. Returns the
/// number of messages marked.
pub fn apply_cache_control(
    messages: &mut [Message],
    config: &CachingConfig,
    estimator: &dyn TokenEstimator,
) -> usize {
    let candidates = select_cache_candidates(messages, config, estimator);
    let mut marked = 0;
    for candidate in &candidates {
        let control = CacheControl::ephemeral(config.ttls.for_category(candidate.category));
        let Some(msg) = messages.get_mut(candidate.index) else {
            continue;
        };
        if mark_message(msg, control) {
            marked += 1;
        }
    }
    debug!(
        "Prompt cache: marked {marked} of {} message(s) (min {} tokens)",
        messages.len(),
        config.min_tokens_for_caching
    );
    marked
}

fn mark_message(msg: &mut Message, control: CacheControl) -> bool {
    match msg.content.take() {
        Some(MessageContent::Text(text)) => {
            msg.content = Some(MessageContent::Parts(vec![ContentPart::Text {
                text,
                cache_control: Some(control),
            }]));
            true
        }
        Some(MessageContent::Parts(mut parts)) => {
            let marked = match parts.last_mut() {
                Some(ContentPart::Text { cache_control, .. }) => {
                    *cache_control = Some(control);
                    true
                }
                None => false,
            };
            msg.content = Some(MessageContent::Parts(parts));
            marked
        }
        None => false,
    }
}
