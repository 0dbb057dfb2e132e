//! Routing pipeline: staged filter/score selection of `(provider, model)`

pub mod context;
pub mod pipeline;
pub mod strategies;

pub use context::{OptimizeMode, RoutingContext};
pub use pipeline::{Candidate, RoutingPipeline};

use crate::core::types::{Model, Provider};
use std::sync::Arc;

/// Outcome of one routing decision
#[derive(Debug, Clone)]
pub struct RoutingResult {
    pub provider: Arc<Provider>,
    pub model: Arc<Model>,
    /// Accumulated pipeline score of the winner
    pub score: f64,
    /// Human-readable trail of strategy contributions
    pub reason: String,
    /// Credential pool account backing `api_key`, when one was resolved
    pub account_id: Option<String>,
    /// Plaintext key to authenticate the upstream call with
    pub api_key: String,
}
