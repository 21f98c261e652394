use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::BudgetError;
use crate::util::lock_unpoisoned;

use super::pricing::{PriceTable, TokenUsage};

/// Float slack when comparing spend to the ceiling, so a sum that lands on
/// the limit (0.1 + 0.2 against 0.3) still fits.
const CEILING_EPSILON: f64 = 1e-9;

/// Usage accumulated for one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost: f64,
}

/// Point-in-time copy of the ledger totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub total_cost: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub api_calls: u64,
    pub max_cost: Option<f64>,
    pub per_model: BTreeMap<String, ModelUsage>,
}

impl LedgerSnapshot {
    pub fn total_tokens(&self) -> u64 {
        self.total_input_tokens
            .saturating_add(self.total_output_tokens)
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    total_cost: f64,
    total_input_tokens: u64,
    total_output_tokens: u64,
    api_calls: u64,
    per_model: BTreeMap<String, ModelUsage>,
}

/// Running spend with a hard ceiling.
///
/// Shared between concurrently running tasks behind an `Arc`; every method
/// takes `&self`.
#[derive(Debug)]
pub struct BudgetLedger {
    prices: PriceTable,
    max_cost: Option<f64>,
    state: Mutex<LedgerState>,
}

impl BudgetLedger {
    pub fn new(prices: PriceTable, max_cost: Option<f64>) -> Self {
        Self {
            prices,
            max_cost,
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    pub fn max_cost(&self) -> Option<f64> {
        self.max_cost
    }

    /// Cost of `usage` without touching the ledger.
    pub fn estimate_cost(&self, model: &str, usage: &TokenUsage) -> f64 {
        self.prices.cost(model, usage)
    }

    /// Price `usage` and commit it, unless the new total would pass the ceiling.
    ///
    /// Returns the incremental cost of this event. On `BudgetError::Exceeded`
    /// nothing is changed.
    pub fn record_usage(&self, model: &str, usage: &TokenUsage) -> Result<f64, BudgetError> {
        let cost = self.prices.cost(model, usage);
        self.record_priced(model, usage, cost)
    }

    /// Commit `usage` at a cost the caller already knows, e.g. one reported by
    /// the remote service. Same ceiling check as [`Self::record_usage`].
    pub fn record_priced(
        &self,
        model: &str,
        usage: &TokenUsage,
        cost: f64,
    ) -> Result<f64, BudgetError> {
        let cost = cost.max(0.0);
        let mut state = lock_unpoisoned(&self.state);

        let projected = state.total_cost + cost;
        if let Some(limit) = self.max_cost {
            if projected > limit + CEILING_EPSILON {
                tracing::warn!(
                    model,
                    cost,
                    current = state.total_cost,
                    limit,
                    "usage rejected: budget ceiling reached"
                );
                return Err(BudgetError::Exceeded {
                    current: state.total_cost,
                    attempted: cost,
                    projected,
                    limit,
                });
            }
        }

        // Input tokens are billed in three flavours; totals count all of them.
        let input_like = usage
            .input_tokens
            .saturating_add(usage.cache_creation_tokens)
            .saturating_add(usage.cache_read_tokens);

        state.total_cost = projected;
        state.total_input_tokens = state.total_input_tokens.saturating_add(input_like);
        state.total_output_tokens = state.total_output_tokens.saturating_add(usage.output_tokens);
        state.api_calls += 1;

        let entry = state.per_model.entry(model.to_string()).or_default();
        entry.calls += 1;
        entry.input_tokens = entry.input_tokens.saturating_add(usage.input_tokens);
        entry.output_tokens = entry.output_tokens.saturating_add(usage.output_tokens);
        entry.cache_creation_tokens = entry
            .cache_creation_tokens
            .saturating_add(usage.cache_creation_tokens);
        entry.cache_read_tokens = entry
            .cache_read_tokens
            .saturating_add(usage.cache_read_tokens);
        entry.cost += cost;

        tracing::debug!(model, cost, total = projected, "usage recorded");
        Ok(cost)
    }

    pub fn total_cost(&self) -> f64 {
        lock_unpoisoned(&self.state).total_cost
    }

    /// `None` when the ledger has no ceiling.
    pub fn remaining_budget(&self) -> Option<f64> {
        let total = self.total_cost();
        self.max_cost.map(|limit| (limit - total).max(0.0))
    }

    /// True once no spend headroom is left.
    pub fn is_over_budget(&self) -> bool {
        match self.max_cost {
            Some(limit) => self.total_cost() >= limit - CEILING_EPSILON,
            None => false,
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = lock_unpoisoned(&self.state);
        LedgerSnapshot {
            total_cost: state.total_cost,
            total_input_tokens: state.total_input_tokens,
            total_output_tokens: state.total_output_tokens,
            api_calls: state.api_calls,
            max_cost: self.max_cost,
            per_model: state.per_model.clone(),
        }
    }

    /// Seed totals from persisted workflow state when resuming a run.
    ///
    /// The per-model breakdown is not persisted and starts empty.
    pub fn restore(&self, total_cost: f64, total_tokens: u64, api_calls: u64) {
        let mut state = lock_unpoisoned(&self.state);
        state.total_cost = total_cost.max(0.0);
        state.total_input_tokens = total_tokens;
        state.total_output_tokens = 0;
        state.api_calls = api_calls;
        state.per_model.clear();
    }

    pub fn reset(&self) {
        *lock_unpoisoned(&self.state) = LedgerState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelRates;
    use std::sync::Arc;

    fn dollar_per_million() -> PriceTable {
        let mut models = BTreeMap::new();
        models.insert(
            "flat".to_string(),
            ModelRates {
                input_per_mtok: 1.0,
                output_per_mtok: 1.0,
            },
        );
        PriceTable::new("flat", models)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_second_event_past_ceiling_is_rejected() {
        let ledger = BudgetLedger::new(dollar_per_million(), Some(1.00));

        let first = ledger
            .record_usage("flat", &TokenUsage::new(600_000, 0))
            .unwrap();
        assert!(approx(first, 0.60));

        let err = ledger
            .record_usage("flat", &TokenUsage::new(500_000, 0))
            .unwrap_err();
        let BudgetError::Exceeded {
            current, projected, ..
        } = err;
        assert!(approx(current, 0.60));
        assert!(approx(projected, 1.10));

        assert!(approx(ledger.total_cost(), 0.60));
        let snap = ledger.snapshot();
        assert_eq!(snap.api_calls, 1);
        assert_eq!(snap.total_input_tokens, 600_000);
        assert_eq!(snap.per_model["flat"].calls, 1);
    }

    #[test]
    fn test_rejection_is_idempotent() {
        let ledger = BudgetLedger::new(dollar_per_million(), Some(0.5));
        ledger
            .record_usage("flat", &TokenUsage::new(400_000, 0))
            .unwrap();
        let before = ledger.snapshot();

        for _ in 0..3 {
            assert!(ledger
                .record_usage("flat", &TokenUsage::new(200_000, 0))
                .is_err());
        }
        assert_eq!(ledger.snapshot(), before);

        // A smaller event still fits.
        ledger
            .record_usage("flat", &TokenUsage::new(100_000, 0))
            .unwrap();
        assert!(approx(ledger.total_cost(), 0.5));
        assert!(ledger.is_over_budget());
        assert_eq!(ledger.remaining_budget(), Some(0.0));
    }

    #[test]
    fn test_spend_landing_exactly_on_ceiling_fits() {
        let ledger = BudgetLedger::new(dollar_per_million(), Some(0.3));
        ledger
            .record_priced("flat", &TokenUsage::new(1, 1), 0.1)
            .unwrap();
        ledger
            .record_priced("flat", &TokenUsage::new(1, 1), 0.2)
            .unwrap();

        assert_eq!(ledger.snapshot().api_calls, 2);
        assert!(ledger.is_over_budget());
        assert!(ledger
            .record_priced("flat", &TokenUsage::new(1, 1), 0.000_001)
            .is_err());
    }

    #[test]
    fn test_reported_cost_overrides_price_table() {
        let ledger = BudgetLedger::new(dollar_per_million(), Some(1.0));
        let cost = ledger
            .record_priced("flat", &TokenUsage::new(10, 10), 0.75)
            .unwrap();
        assert!(approx(cost, 0.75));
        assert!(ledger
            .record_priced("flat", &TokenUsage::new(10, 10), 0.30)
            .is_err());
        assert_eq!(ledger.snapshot().total_tokens(), 20);
    }

    #[test]
    fn test_unlimited_budget() {
        let ledger = BudgetLedger::new(dollar_per_million(), None);
        ledger
            .record_usage("flat", &TokenUsage::new(50_000_000, 0))
            .unwrap();
        assert!(!ledger.is_over_budget());
        assert_eq!(ledger.remaining_budget(), None);
    }

    #[test]
    fn test_estimate_does_not_commit() {
        let ledger = BudgetLedger::new(dollar_per_million(), Some(1.0));
        let est = ledger.estimate_cost("flat", &TokenUsage::new(250_000, 250_000));
        assert!(approx(est, 0.5));
        assert_eq!(ledger.total_cost(), 0.0);
    }

    #[test]
    fn test_restore_and_reset() {
        let ledger = BudgetLedger::new(dollar_per_million(), Some(1.0));
        ledger.restore(0.9, 900_000, 12);
        assert!(approx(ledger.remaining_budget().unwrap(), 0.1));
        assert!(ledger
            .record_usage("flat", &TokenUsage::new(200_000, 0))
            .is_err());

        ledger.reset();
        assert_eq!(ledger.snapshot().api_calls, 0);
        assert_eq!(ledger.total_cost(), 0.0);
    }

    #[test]
    fn test_concurrent_recording_never_passes_ceiling() {
        let ledger = Arc::new(BudgetLedger::new(dollar_per_million(), Some(1.0)));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    let mut ok = 0;
                    for _ in 0..10 {
                        if ledger
                            .record_usage("flat", &TokenUsage::new(30_000, 0))
                            .is_ok()
                        {
                            ok += 1;
                        }
                    }
                    ok
                })
            })
            .collect();

        let accepted: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        let total = ledger.total_cost();
        assert!(total <= 1.0);
        assert_eq!(ledger.snapshot().api_calls, accepted);
        assert!(approx(total, accepted as f64 * 0.03));
    }
}
