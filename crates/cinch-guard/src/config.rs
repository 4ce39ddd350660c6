//! Guard profiles: named bundles of retry, breaker, and caching settings.
//!
//! A [`GuardProfile`] is either built from a [`ProfilePreset`] or loaded from
//! a JSON file. Files may be partial; every omitted field takes its
//! `balanced` value. Loaded profiles are checked against the profile's JSON
//! Schema first and then against the numeric invariants each section
//! enforces in its own `validate()`.
//!
//! ```json
//! {
//!   "name": "batch-jobs",
//!   "retry": { "max_retries": 6, "cost_aware_retry": false },
//!   "breaker": { "failure_threshold": 8 },
//!   "caching": { "aggressive_caching": true }
//! }
//! ```

use std::path::Path;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::breaker::BreakerConfig;
use crate::api::retry::RetryPolicy;
use crate::cache::CachingConfig;

/// The three built-in profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProfilePreset {
    /// Few retries, tight cost ceiling, breaker trips early.
    Conservative,
    /// The default.
    Balanced,
    /// Many retries, retries unknown errors, no cost gating.
    Aggressive,
}

impl ProfilePreset {
    pub const ALL: [ProfilePreset; 3] = [
        ProfilePreset::Conservative,
        ProfilePreset::Balanced,
        ProfilePreset::Aggressive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProfilePreset::Conservative => "conservative",
            ProfilePreset::Balanced => "balanced",
            ProfilePreset::Aggressive => "aggressive",
        }
    }
}

impl std::fmt::Display for ProfilePreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfilePreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conservative" => Ok(ProfilePreset::Conservative),
            "balanced" => Ok(ProfilePreset::Balanced),
            "aggressive" => Ok(ProfilePreset::Aggressive),
            other => Err(format!(
                "unknown profile '{other}' (expected conservative, balanced, or aggressive)"
            )),
        }
    }
}

/// Retry, breaker, and caching settings for one call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GuardProfile {
    /// Free-form label used in logs.
    pub name: String,
    pub retry: RetryPolicy,
    pub breaker: BreakerConfig,
    pub caching: CachingConfig,
}

impl Default for GuardProfile {
    fn default() -> Self {
        Self::preset(ProfilePreset::Balanced)
    }
}

impl GuardProfile {
    pub fn preset(preset: ProfilePreset) -> Self {
        let (retry, breaker, caching) = match preset {
            ProfilePreset::Conservative => (
                RetryPolicy::conservative(),
                BreakerConfig::conservative(),
                CachingConfig::conservative(),
            ),
            ProfilePreset::Balanced => (
                RetryPolicy::balanced(),
                BreakerConfig::balanced(),
                CachingConfig::balanced(),
            ),
            ProfilePreset::Aggressive => (
                RetryPolicy::aggressive(),
                BreakerConfig::aggressive(),
                CachingConfig::aggressive(),
            ),
        };
        Self {
            name: preset.as_str().to_string(),
            retry,
            breaker,
            caching,
        }
    }

    /// JSON Schema describing a profile file.
    pub fn schema() -> serde_json::Value {
        let schema = schemars::schema_for!(GuardProfile);
        serde_json::to_value(schema)
            .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
    }

    /// Parse and validate a profile from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self, String> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| format!("invalid profile JSON: {e}"))?;

        let schema = Self::schema();
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| format!("profile schema is invalid: {e}"))?;
        let errors: Vec<String> = validator
            .iter_errors(&value)
            .map(|e| format!("  - {}: {e}", e.instance_path()))
            .collect();
        if !errors.is_empty() {
            return Err(format!(
                "profile does not match schema:\n{}",
                errors.join("\n")
            ));
        }

        let profile: GuardProfile =
            serde_json::from_value(value).map_err(|e| format!("failed to parse profile: {e}"))?;
        profile.validate()?;
        Ok(profile)
    }

    /// Load a profile from a JSON file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read profile {}: {e}", path.display()))?;
        let profile = Self::from_json_str(&data)?;
        debug!(
            "Loaded guard profile '{}' from {}",
            profile.name,
            path.display()
        );
        Ok(profile)
    }

    /// Resolve a CLI-style argument: a preset name, or a path to a JSON file.
    pub fn resolve(name_or_path: &str) -> Result<Self, String> {
        match name_or_path.parse::<ProfilePreset>() {
            Ok(preset) => Ok(Self::preset(preset)),
            Err(_) => Self::load(Path::new(name_or_path)),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.retry
            .validate()
            .map_err(|e| format!("retry: {e}"))?;
        self.breaker
            .validate()
            .map_err(|e| format!("breaker: {e}"))?;
        Ok(())
    }

    pub fn to_json_pretty(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| format!("failed to serialize profile: {e}"))
    }
}
