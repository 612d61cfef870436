//! Per-job cost ledger.
//!
//! Pricing is a static table of USD per million tokens. Unknown models cost
//! zero and log a warning: a missing price must never abort a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// USD per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

const fn price(input_per_million: f64, output_per_million: f64) -> ModelPricing {
    ModelPricing {
        input_per_million,
        output_per_million,
    }
}

/// Known model prices. Image models are priced on their reported usage tokens.
pub const PRICING: &[(&str, ModelPricing)] = &[
    ("gemini-2.0-flash", price(0.10, 0.40)),
    ("gemini-2.5-flash", price(0.30, 2.50)),
    ("gemini-2.5-flash-lite", price(0.10, 0.40)),
    ("gemini-2.5-pro", price(1.25, 10.00)),
    ("claude-haiku-4-20250514", price(0.80, 4.00)),
    ("claude-sonnet-4-20250514", price(3.00, 15.00)),
    ("claude-opus-4-20250514", price(15.00, 75.00)),
    ("gpt-4.1-nano", price(0.10, 0.40)),
    ("gpt-4.1-mini", price(0.40, 1.60)),
    ("gpt-4.1", price(2.00, 8.00)),
    ("gpt-4o", price(2.50, 10.00)),
    ("gpt-4o-mini", price(0.15, 0.60)),
    ("gpt-image-1", price(5.00, 40.00)),
    ("gpt-image-1-mini", price(2.00, 8.00)),
];

/// Look up the price of `model`, if it is in the table.
pub fn pricing_for(model: &str) -> Option<ModelPricing> {
    PRICING
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, p)| *p)
}

/// Cost in USD of one call. Returns `0.0` for models missing from [`PRICING`].
pub fn cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    match pricing_for(model) {
        Some(p) => {
            input_tokens as f64 / 1e6 * p.input_per_million
                + output_tokens as f64 / 1e6 * p.output_per_million
        }
        None => {
            warn!("No pricing for model '{}'; recording zero cost", model);
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
    pub label: Option<String>,
}

/// Totals for one model within a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCost {
    pub calls: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub total_cost: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub calls: usize,
    pub by_model: BTreeMap<String, ModelCost>,
}

/// Append-only ledger owned by a single job.
#[derive(Debug, Default)]
pub struct CostTracker {
    entries: Vec<CostEntry>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Price and append one call; returns the cost just recorded.
    pub fn record(
        &mut self,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        label: Option<&str>,
    ) -> f64 {
        let c = cost(model, input_tokens, output_tokens);
        self.entries.push(CostEntry {
            model: model.to_string(),
            input_tokens,
            output_tokens,
            cost: c,
            timestamp: Utc::now(),
            label: label.map(str::to_string),
        });
        c
    }

    pub fn entries(&self) -> &[CostEntry] {
        &self.entries
    }

    pub fn total_cost(&self) -> f64 {
        self.entries.iter().map(|e| e.cost).sum()
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.entries.iter().map(|e| e.input_tokens).sum()
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.entries.iter().map(|e| e.output_tokens).sum()
    }

    pub fn summary(&self) -> CostSummary {
        let mut by_model: BTreeMap<String, ModelCost> = BTreeMap::new();
        for e in &self.entries {
            let m = by_model.entry(e.model.clone()).or_default();
            m.calls += 1;
            m.input_tokens += e.input_tokens;
            m.output_tokens += e.output_tokens;
            m.cost += e.cost;
        }
        CostSummary {
            total_cost: self.total_cost(),
            total_input_tokens: self.total_input_tokens(),
            total_output_tokens: self.total_output_tokens(),
            calls: self.entries.len(),
            by_model,
        }
    }
}
