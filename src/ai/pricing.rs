//! Per-model token pricing and usage bookkeeping.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::TokenUsage;

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub prompt: f64,
    pub completion: f64,
}

const PRICES: &[(&str, ModelPrice)] = &[
    ("openai/gpt-4o-mini", ModelPrice { prompt: 0.15, completion: 0.60 }),
    ("openai/gpt-4o", ModelPrice { prompt: 2.50, completion: 10.00 }),
    ("anthropic/claude-3.5-sonnet", ModelPrice { prompt: 3.00, completion: 15.00 }),
    ("anthropic/claude-3-haiku", ModelPrice { prompt: 0.25, completion: 1.25 }),
    ("google/gemini-flash-1.5", ModelPrice { prompt: 0.075, completion: 0.30 }),
    ("meta-llama/llama-3.1-70b-instruct", ModelPrice { prompt: 0.52, completion: 0.75 }),
    ("mistralai/mistral-7b-instruct", ModelPrice { prompt: 0.06, completion: 0.06 }),
];

/// Price of `model`, if known.
pub fn price_for(model: &str) -> Option<ModelPrice> {
    PRICES
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, price)| *price)
}

/// Estimated cost of one call in USD. Unknown models cost nothing.
pub fn estimate_cost(model: &str, usage: &TokenUsage) -> f64 {
    match price_for(model) {
        Some(price) => {
            (f64::from(usage.prompt_tokens) * price.prompt
                + f64::from(usage.completion_tokens) * price.completion)
                / 1_000_000.0
        }
        None => 0.0,
    }
}

/// Accumulated usage of one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub model: String,
    pub requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

/// Thread-safe per-model usage counters.
#[derive(Debug, Default)]
pub struct UsageTracker {
    models: Mutex<HashMap<String, ModelUsage>>,
}

impl UsageTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call.
    pub fn record(&self, model: &str, usage: &TokenUsage, cost: f64) {
        let mut models = self.models.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = models.entry(model.to_string()).or_insert_with(|| ModelUsage {
            model: model.to_string(),
            ..Default::default()
        });
        entry.requests += 1;
        entry.prompt_tokens += u64::from(usage.prompt_tokens);
        entry.completion_tokens += u64::from(usage.completion_tokens);
        entry.cost_usd += cost;
    }

    /// Usage per model, sorted by model name.
    pub fn summary(&self) -> Vec<ModelUsage> {
        let mut rows: Vec<ModelUsage> = self
            .models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.model.cmp(&b.model));
        rows
    }
}
