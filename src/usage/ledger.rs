use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::{RunTotals, UsageStore, UsageStoreError};
use crate::pricing::{PricingMatch, PricingTable};

/// Round a dollar amount to six decimal places for reporting.
pub fn round_cost(cost: f64) -> f64 {
    (cost * 1_000_000.0).round() / 1_000_000.0
}

/// Token counts reported by a provider for one call.
///
/// `input_tokens` excludes tokens served from a context cache; those are
/// counted in `cached_tokens` and billed at the cached rate. Both engines
/// split cached tokens out of the provider's prompt count, including the
/// chat-completion engine whose `prompt_tokens` already contains them, so
/// recorded input is lower than the raw `prompt_tokens` whenever the cache is hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64, cached_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cached_tokens,
        }
    }
}

/// One priced call. Cost is fixed at record time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_index: Option<u64>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    /// Unrounded result of the pricing formula.
    pub cost: f64,
    pub pricing_match: PricingMatch,
}

/// Snapshot of a ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cached_tokens: u64,
    /// Rounded to six decimals.
    pub total_cost: f64,
    pub history: Vec<UsageRecord>,
}

/// Running token and cost totals for one simulation run.
#[derive(Debug, Clone, Default)]
pub struct UsageLedger {
    pricing: PricingTable,
    total_input_tokens: u64,
    total_output_tokens: u64,
    total_cached_tokens: u64,
    total_cost: f64,
    history: Vec<UsageRecord>,
}

impl UsageLedger {
    pub fn new(pricing: PricingTable) -> Self {
        Self {
            pricing,
            ..Default::default()
        }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Price a call, append it to the history and return its cost rounded to
    /// six decimals. Totals keep full precision.
    pub fn record(
        &mut self,
        model_id: &str,
        usage: TokenUsage,
        agent_identity: Option<&str>,
        turn_index: Option<u64>,
    ) -> f64 {
        let lookup = self.pricing.lookup(model_id);
        if lookup.matched == PricingMatch::Default {
            tracing::warn!(
                model = model_id,
                fallback = lookup.key,
                "No pricing for model, using default rates"
            );
        }

        let cost = lookup
            .rate
            .cost(usage.input_tokens, usage.output_tokens, usage.cached_tokens);
        let rounded = round_cost(cost);

        tracing::debug!(
            model = model_id,
            pricing_key = lookup.key,
            pricing_match = %lookup.matched,
            agent = agent_identity,
            turn = turn_index,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            cached_tokens = usage.cached_tokens,
            cost = rounded,
            "Recorded usage"
        );

        self.history.push(UsageRecord {
            timestamp: Utc::now(),
            model_id: model_id.to_string(),
            agent_identity: agent_identity.map(str::to_string),
            turn_index,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cached_tokens: usage.cached_tokens,
            cost,
            pricing_match: lookup.matched,
        });
        self.total_input_tokens += usage.input_tokens;
        self.total_output_tokens += usage.output_tokens;
        self.total_cached_tokens += usage.cached_tokens;
        self.total_cost += cost;

        rounded
    }

    pub fn summary(&self) -> UsageSummary {
        UsageSummary {
            total_input_tokens: self.total_input_tokens,
            total_output_tokens: self.total_output_tokens,
            total_cached_tokens: self.total_cached_tokens,
            total_cost: round_cost(self.total_cost),
            history: self.history.clone(),
        }
    }

    pub fn totals(&self) -> RunTotals {
        RunTotals {
            total_input: self.total_input_tokens,
            total_output: self.total_output_tokens,
            total_cached: self.total_cached_tokens,
            total_cost: round_cost(self.total_cost),
        }
    }

    pub fn history(&self) -> &[UsageRecord] {
        &self.history
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Clear totals and history. Pricing is kept.
    pub fn reset(&mut self) {
        self.total_input_tokens = 0;
        self.total_output_tokens = 0;
        self.total_cached_tokens = 0;
        self.total_cost = 0.0;
        self.history.clear();
    }

    /// Append this run's totals to the durable log and cumulative table.
    pub fn persist(&self, run_label: &str, store: &UsageStore) -> Result<(), UsageStoreError> {
        store.append_run(run_label, &self.totals())
    }
}
