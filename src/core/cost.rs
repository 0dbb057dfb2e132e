//! Per-request cost accounting
//!
//! Costs are computed from the model's catalog unit prices and reported
//! through usage recording; nothing here enforces budgets.

use crate::core::types::{Model, Usage};

/// USD cost of one request against the given model.
pub fn usage_cost(model: &Model, usage: &Usage) -> f64 {
    let input = usage.prompt_tokens as f64 / 1000.0 * model.input_cost_per_1k;
    let output = usage.completion_tokens as f64 / 1000.0 * model.output_cost_per_1k;
    input + output
}
