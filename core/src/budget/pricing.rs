use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{ModelRates, PricingConfig};

/// Cache writes cost 25% more than regular input.
pub const CACHE_WRITE_MULTIPLIER: f64 = 1.25;
/// Cache reads are discounted by 90%.
pub const CACHE_READ_MULTIPLIER: f64 = 0.10;

const PER_MILLION: f64 = 1_000_000.0;

/// Token counts reported for a single remote call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Self::default()
        }
    }

    pub fn with_cache(mut self, creation: u64, read: u64) -> Self {
        self.cache_creation_tokens = creation;
        self.cache_read_tokens = read;
        self
    }

    pub fn total(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_creation_tokens)
            .saturating_add(self.cache_read_tokens)
    }
}

#[derive(Debug, Clone)]
pub struct PriceTable {
    default_model: String,
    models: BTreeMap<String, ModelRates>,
}

impl PriceTable {
    pub fn new(default_model: impl Into<String>, models: BTreeMap<String, ModelRates>) -> Self {
        Self {
            default_model: default_model.into(),
            models,
        }
    }

    pub fn from_config(cfg: &PricingConfig) -> Self {
        Self::new(cfg.default_model.clone(), cfg.models.clone())
    }

    /// Rates for `model`: exact name first, then the longest configured name the
    /// model starts with (dated variants such as `claude-sonnet-4-20250514`),
    /// then the default model. Free if nothing matches at all.
    pub fn rates_for(&self, model: &str) -> ModelRates {
        if let Some(rates) = self.models.get(model) {
            return *rates;
        }

        let prefixed = self
            .models
            .iter()
            .filter(|(name, _)| model.starts_with(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, rates)| *rates);

        prefixed
            .or_else(|| self.models.get(&self.default_model).copied())
            .unwrap_or(ModelRates {
                input_per_mtok: 0.0,
                output_per_mtok: 0.0,
            })
    }

    pub fn cost(&self, model: &str, usage: &TokenUsage) -> f64 {
        let rates = self.rates_for(model);
        let input = usage.input_tokens as f64 * rates.input_per_mtok;
        let output = usage.output_tokens as f64 * rates.output_per_mtok;
        let cache_write =
            usage.cache_creation_tokens as f64 * rates.input_per_mtok * CACHE_WRITE_MULTIPLIER;
        let cache_read =
            usage.cache_read_tokens as f64 * rates.input_per_mtok * CACHE_READ_MULTIPLIER;

        (input + output + cache_write + cache_read) / PER_MILLION
    }
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::from_config(&PricingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_base_rates() {
        let table = PriceTable::default();
        // sonnet: $3 in / $15 out per million
        let cost = table.cost("claude-sonnet-4", &TokenUsage::new(1_000_000, 100_000));
        assert!(approx(cost, 3.0 + 1.5));
    }

    #[test]
    fn test_cache_multipliers() {
        let table = PriceTable::default();
        let usage = TokenUsage::default().with_cache(1_000_000, 1_000_000);
        let cost = table.cost("claude-sonnet-4", &usage);
        assert!(approx(cost, 3.0 * 1.25 + 3.0 * 0.10));
    }

    #[test]
    fn test_dated_model_matches_prefix() {
        let table = PriceTable::default();
        let rates = table.rates_for("claude-opus-4-20250514");
        assert!(approx(rates.input_per_mtok, 15.0));
    }

    #[test]
    fn test_unknown_model_uses_default() {
        let table = PriceTable::default();
        let rates = table.rates_for("mystery-model");
        assert_eq!(rates, table.rates_for("claude-sonnet-4"));
    }

    #[test]
    fn test_usage_total() {
        let usage = TokenUsage::new(10, 20).with_cache(3, 4);
        assert_eq!(usage.total(), 37);
    }
}
