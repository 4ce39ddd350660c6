//! Per-model pricing and cost estimation.
//!
//! Prices are supplied by the caller (typically from OpenRouter's model
//! listing) and treated as read-only metadata. Estimation never fails:
//! missing, negative or non-finite prices count as zero.

use serde::{Deserialize, Serialize};

/// Per-model pricing for cost estimation (USD per 1M tokens).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ModelPricing {
    /// Price per 1M input tokens.
    #[serde(default)]
    pub input_per_million: f64,
    /// Price per 1M output tokens.
    #[serde(default)]
    pub output_per_million: f64,
}

impl ModelPricing {
    pub fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// Estimate cost for given token counts.
    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * sanitize(self.input_per_million)
            + (output_tokens as f64 / 1_000_000.0) * sanitize(self.output_per_million)
    }

    /// Parse the `pricing` block of an OpenRouter model listing entry.
    ///
    /// OpenRouter reports USD *per token* as decimal strings:
    ///
    /// ```json
    /// { "id": "anthropic/claude-sonnet-4",
    ///   "pricing": { "prompt": "0.000003", "completion": "0.000015" } }
    /// ```
    ///
    /// Accepts either the whole model entry or just its `pricing` object.
    /// Unparseable or absent fields become zero.
    pub fn from_openrouter_metadata(value: &serde_json::Value) -> Self {
        let pricing = value.get("pricing").unwrap_or(value);
        let per_token = |field: &str| -> f64 {
            match pricing.get(field) {
                Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0.0),
                Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
                _ => 0.0,
            }
        };
        Self {
            input_per_million: sanitize(per_token("prompt") * 1_000_000.0),
            output_per_million: sanitize(per_token("completion") * 1_000_000.0),
        }
    }
}

/// Estimate the cost of a call. `pricing = None` costs nothing.
pub fn estimate_cost(pricing: Option<&ModelPricing>, input_tokens: u64, output_tokens: u64) -> f64 {
    pricing.map_or(0.0, |p| p.estimate_cost(input_tokens, output_tokens))
}

fn sanitize(price: f64) -> f64 {
    if price.is_finite() && price > 0.0 {
        price
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_estimation() {
        let pricing = ModelPricing::new(3.0, 15.0);
        let cost = pricing.estimate_cost(1_000_000, 100_000);
        assert!((cost - 4.5).abs() < 1e-9); // 3.0 + 1.5
    }

    #[test]
    fn output_tokens_default_to_nothing() {
        let pricing = ModelPricing::new(3.0, 15.0);
        assert!((pricing.estimate_cost(1_000_000, 0) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn missing_pricing_costs_zero() {
        assert_eq!(estimate_cost(None, 5_000_000, 5_000_000), 0.0);
        let partial: ModelPricing = serde_json::from_str(r#"{"input_per_million": 2.0}"#).unwrap();
        assert_eq!(partial.output_per_million, 0.0);
        assert!((partial.estimate_cost(500_000, 999_999) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn malformed_prices_count_as_zero() {
        let pricing = ModelPricing::new(f64::NAN, -4.0);
        assert_eq!(pricing.estimate_cost(1_000_000, 1_000_000), 0.0);
        let pricing = ModelPricing::new(f64::INFINITY, 1.0);
        assert!((pricing.estimate_cost(1_000_000, 1_000_000) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn parses_openrouter_metadata() {
        let entry = serde_json::json!({
            "id": "anthropic/claude-sonnet-4",
            "pricing": { "prompt": "0.000003", "completion": "0.000015", "request": "0" }
        });
        let p = ModelPricing::from_openrouter_metadata(&entry);
        assert!((p.input_per_million - 3.0).abs() < 1e-6);
        assert!((p.output_per_million - 15.0).abs() < 1e-6);

        let bare = serde_json::json!({ "prompt": 0.0000005 });
        let p = ModelPricing::from_openrouter_metadata(&bare);
        assert!((p.input_per_million - 0.5).abs() < 1e-6);
        assert_eq!(p.output_per_million, 0.0);
    }

    #[test]
    fn openrouter_sentinel_prices_are_zero() {
        // Router pseudo-models report "-1" for variable pricing.
        let entry = serde_json::json!({ "pricing": { "prompt": "-1", "completion": "junk" } });
        assert_eq!(
            ModelPricing::from_openrouter_metadata(&entry),
            ModelPricing::default()
        );
    }
}
