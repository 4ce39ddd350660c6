//! Model fallback chains built from an externally ordered price table.
//!
//! The caller decides the order (cheapest first, preferred first, whatever
//! its price source says). The router only trims the table to a bounded
//! fallback chain, skips models whose endpoint is currently refusing
//! requests, and writes the result into a [`ChatRequest`].

use super::pricing::ModelPricing;
use super::retry::RetryPolicy;
use crate::{ChatRequest, ProviderPreferences, ProviderSort};

/// Default length of the `models` fallback chain.
pub const DEFAULT_MAX_MODELS: usize = 3;

/// One row of the caller's price table.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedModel {
    pub id: String,
    pub pricing: ModelPricing,
}

impl PricedModel {
    pub fn new(id: impl Into<String>, pricing: ModelPricing) -> Self {
        Self {
            id: id.into(),
            pricing,
        }
    }
}

/// The models chosen for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Primary model first, then fallbacks.
    pub models: Vec<String>,
    /// Pricing of the primary model, for cost-aware retries.
    pub primary_pricing: Option<ModelPricing>,
}

/// Builds fallback chains and provider preferences.
#[derive(Debug, Clone)]
pub struct ModelRouter {
    max_models: usize,
    sort: Option<ProviderSort>,
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self {
            max_models: DEFAULT_MAX_MODELS,
            sort: None,
        }
    }
}

impl ModelRouter {
    pub fn new(max_models: usize) -> Self {
        Self {
            max_models: max_models.max(1),
            sort: None,
        }
    }

    /// Router matching a retry profile: cost-aware profiles ask OpenRouter
    /// to rank providers by price.
    pub fn for_policy(policy: &RetryPolicy) -> Self {
        let router = Self::default();
        if policy.cost_aware_retry {
            router.with_sort(ProviderSort::Price)
        } else {
            router
        }
    }

    pub fn with_sort(mut self, sort: ProviderSort) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Pick up to `max_models` entries in table order, skipping models for
    /// which `available` returns false. When every model is unavailable the
    /// first table entry is kept so the request still names a model.
    pub fn route(&self, table: &[PricedModel], available: impl Fn(&str) -> bool) -> Route {
        let mut chosen: Vec<&PricedModel> = table
            .iter()
            .filter(|m| available(&m.id))
            .take(self.max_models)
            .collect();
        if chosen.is_empty()
            && let Some(first) = table.first()
        {
            chosen.push(first);
        }

        Route {
            models: chosen.iter().map(|m| m.id.clone()).collect(),
            primary_pricing: chosen.first().map(|m| m.pricing),
        }
    }

    /// Write a route into a request body: a single `model`, or a `models`
    /// fallback chain, plus provider preferences when a sort is configured.
    pub fn apply(&self, route: &Route, request: &mut ChatRequest) {
        match route.models.as_slice() {
            [] => {}
            [only] => {
                request.model = Some(only.clone());
                request.models = None;
                request.route = None;
            }
            many => {
                request.model = None;
                request.models = Some(many.to_vec());
                request.route = Some("fallback".into());
            }
        }
        if let Some(sort) = self.sort {
            request.provider = Some(ProviderPreferences {
                order: None,
                allow_fallbacks: Some(true),
                sort: Some(sort),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Vec<PricedModel> {
        vec![
            PricedModel::new("deepseek/deepseek-chat", ModelPricing::new(0.27, 1.10)),
            PricedModel::new("anthropic/claude-3.5-haiku", ModelPricing::new(0.8, 4.0)),
            PricedModel::new("anthropic/claude-sonnet-4", ModelPricing::new(3.0, 15.0)),
            PricedModel::new("anthropic/claude-opus-4", ModelPricing::new(15.0, 75.0)),
        ]
    }

    #[test]
    fn keeps_table_order_and_bounds_length() {
        let route = ModelRouter::default().route(&table(), |_| true);
        assert_eq!(
            route.models,
            vec![
                "deepseek/deepseek-chat",
                "anthropic/claude-3.5-haiku",
                "anthropic/claude-sonnet-4"
            ]
        );
        assert_eq!(route.primary_pricing, Some(ModelPricing::new(0.27, 1.10)));
    }

    #[test]
    fn skips_unavailable_models() {
        let route = ModelRouter::new(2).route(&table(), |id| !id.starts_with("deepseek"));
        assert_eq!(
            route.models,
            vec!["anthropic/claude-3.5-haiku", "anthropic/claude-sonnet-4"]
        );
        assert_eq!(route.primary_pricing, Some(ModelPricing::new(0.8, 4.0)));
    }

    #[test]
    fn falls_back_to_first_entry_when_nothing_available() {
        let route = ModelRouter::default().route(&table(), |_| false);
        assert_eq!(route.models, vec!["deepseek/deepseek-chat"]);
        let empty = ModelRouter::default().route(&[], |_| true);
        assert!(empty.models.is_empty());
        assert_eq!(empty.primary_pricing, None);
    }

    #[test]
    fn apply_single_model() {
        let mut req = ChatRequest::default();
        let router = ModelRouter::new(1);
        let route = router.route(&table(), |_| true);
        router.apply(&route, &mut req);
        assert_eq!(req.model.as_deref(), Some("deepseek/deepseek-chat"));
        assert!(req.models.is_none());
        assert!(req.provider.is_none());
    }

    #[test]
    fn apply_fallback_chain_with_price_sort() {
        let mut req = ChatRequest {
            model: Some("stale".into()),
            ..Default::default()
        };
        let router = ModelRouter::for_policy(&RetryPolicy::balanced());
        let route = router.route(&table(), |_| true);
        router.apply(&route, &mut req);

        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("model").is_none());
        assert_eq!(json["models"].as_array().unwrap().len(), 3);
        assert_eq!(json["route"], "fallback");
        assert_eq!(json["provider"]["sort"], "price");
    }

    #[test]
    fn non_cost_aware_policy_leaves_provider_alone() {
        let router = ModelRouter::for_policy(&RetryPolicy::aggressive());
        let mut req = ChatRequest::default();
        router.apply(&router.route(&table(), |_| true), &mut req);
        assert!(req.provider.is_none());
    }
}
