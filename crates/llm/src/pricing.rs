//! Model pricing — USD per million tokens, used to stamp call costs.

use std::collections::HashMap;

/// Per-million-token pricing for one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_m: f64,
    pub output_per_m: f64,
}

/// Prefix-matched pricing table.
///
/// Lookup walks entries whose model-name prefix matches and picks the
/// longest; unknown models price at zero so cost accounting degrades to a
/// no-op rather than failing calls.
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    entries: HashMap<String, ModelPricing>,
}

impl PricingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in table for commonly routed models.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table.insert("deepseek-chat", 0.27, 1.10);
        table.insert("deepseek-reasoner", 0.55, 2.19);
        table.insert("llama-3.3-70b", 0.59, 0.79);
        table.insert("llama-3.1-8b", 0.05, 0.08);
        table.insert("sonar", 1.0, 1.0);
        table.insert("sonar-pro", 3.0, 15.0);
        table
    }

    pub fn insert(&mut self, model_prefix: impl Into<String>, input_per_m: f64, output_per_m: f64) {
        self.entries.insert(
            model_prefix.into(),
            ModelPricing {
                input_per_m,
                output_per_m,
            },
        );
    }

    pub fn lookup(&self, model: &str) -> Option<ModelPricing> {
        self.entries
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, pricing)| *pricing)
    }

    /// USD cost of a call; zero for unknown models.
    pub fn cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        match self.lookup(model) {
            Some(p) => {
                (input_tokens as f64 * p.input_per_m + output_tokens as f64 * p.output_per_m)
                    / 1_000_000.0
            }
            None => 0.0,
        }
    }
}
