//! Pipeline executor: runs the strategy chain over a candidate set

use super::context::RoutingContext;
use super::strategies::{RouteStrategy, default_strategies};
use crate::core::types::{Model, Provider};
use crate::utils::error::{GatewayError, Result};
use std::sync::Arc;
use tracing::debug;

/// One model/provider pair flowing through the pipeline
#[derive(Debug, Clone)]
pub struct Candidate {
    pub model: Arc<Model>,
    pub provider: Arc<Provider>,
    /// Accumulated score across all strategies
    pub score: f64,
    /// Strategy contributions, for the routing explanation
    pub trail: Vec<String>,
}

impl Candidate {
    pub fn new(model: Arc<Model>, provider: Arc<Provider>) -> Self {
        Self {
            model,
            provider,
            score: 0.0,
            trail: Vec::new(),
        }
    }

    /// Add a named score contribution.
    pub fn add_score(&mut self, strategy: &str, bonus: f64) {
        self.score += bonus;
        self.trail.push(format!("{}(+{:.2})", strategy, bonus));
    }

    /// Render the explanation trail.
    pub fn reason(&self) -> String {
        if self.trail.is_empty() {
            "default".to_string()
        } else {
            self.trail.join(" ")
        }
    }
}

/// Ordered strategy chain
pub struct RoutingPipeline {
    strategies: Vec<Box<dyn RouteStrategy>>,
}

impl Default for RoutingPipeline {
    fn default() -> Self {
        Self::new(default_strategies())
    }
}

impl RoutingPipeline {
    /// Build a pipeline; strategies are ordered by descending priority.
    pub fn new(mut strategies: Vec<Box<dyn RouteStrategy>>) -> Self {
        strategies.sort_by(|a, b| b.priority().cmp(&a.priority()));
        Self { strategies }
    }

    /// Run the chain and return the winner.
    pub fn run(&self, ctx: &RoutingContext, mut candidates: Vec<Candidate>) -> Result<Candidate> {
        if candidates.is_empty() {
            return Err(GatewayError::Routing(
                "no candidate models available".to_string(),
            ));
        }

        for strategy in &self.strategies {
            candidates = strategy.filter(ctx, candidates);
            if candidates.is_empty() {
                return Err(GatewayError::Routing(format!(
                    "no_candidates_after_{}",
                    strategy.name()
                )));
            }
            strategy.score(ctx, &mut candidates);
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.model.id.cmp(&b.model.id))
        });

        let winner = candidates.into_iter().next().ok_or_else(|| {
            GatewayError::Routing("no candidate survived the strategy chain".to_string())
        })?;
        debug!(
            model = %winner.model.id,
            provider = %winner.provider.id,
            score = winner.score,
            "routing pipeline selected candidate"
        );
        Ok(winner)
    }
}
