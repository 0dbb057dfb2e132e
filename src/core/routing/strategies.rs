//! Routing strategies
//!
//! Each strategy runs a filter pass and a score pass over the candidate
//! list. Priorities are fixed: the chain's semantics depend on the order
//! in which filters narrow the set.

use super::context::{OptimizeMode, RoutingContext};
use super::pipeline::Candidate;
use rand::Rng;
use tracing::warn;

/// Reply headroom added on top of the estimated prompt tokens before
/// comparing against a model's context window
pub const CONTEXT_HEADROOM_TOKENS: u32 = 4096;

/// One stage of the routing pipeline
pub trait RouteStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Chain position; higher runs earlier
    fn priority(&self) -> u32;

    /// Narrow the candidate set. Returning an empty set fails the pipeline
    /// unless the strategy itself substitutes a graceful fallback.
    fn filter(&self, _ctx: &RoutingContext, candidates: Vec<Candidate>) -> Vec<Candidate> {
        candidates
    }

    /// Add score contributions to the surviving candidates.
    fn score(&self, _ctx: &RoutingContext, _candidates: &mut [Candidate]) {}
}

/// Keeps the caller's preferred models and rewards preference rank.
///
/// An empty intersection falls back to the full candidate set: a stale
/// preference list must not make a request unroutable.
pub struct UserPreferenceStrategy;

impl RouteStrategy for UserPreferenceStrategy {
    fn name(&self) -> &'static str {
        "user_preference"
    }

    fn priority(&self) -> u32 {
        100
    }

    fn filter(&self, ctx: &RoutingContext, candidates: Vec<Candidate>) -> Vec<Candidate> {
        if ctx.preferred_models.is_empty() {
            return candidates;
        }
        let preferred: Vec<Candidate> = candidates
            .iter()
            .filter(|c| ctx.preferred_models.iter().any(|m| *m == c.model.id))
            .cloned()
            .collect();
        if preferred.is_empty() {
            candidates
        } else {
            preferred
        }
    }

    fn score(&self, ctx: &RoutingContext, candidates: &mut [Candidate]) {
        let count = ctx.preferred_models.len();
        for candidate in candidates.iter_mut() {
            if let Some(position) = ctx
                .preferred_models
                .iter()
                .position(|m| *m == candidate.model.id)
            {
                let bonus = 10.0 * (count - position) as f64;
                candidate.add_score(self.name(), bonus);
            }
        }
    }
}

/// Drops candidates whose provider is marked unhealthy in the context
/// snapshot. Unknown providers are assumed healthy.
///
/// Emergency override: if the filter would empty the set, every candidate
/// passes through; a fully red snapshot must not black-hole traffic.
pub struct HealthFilterStrategy;

impl RouteStrategy for HealthFilterStrategy {
    fn name(&self) -> &'static str {
        "health_filter"
    }

    fn priority(&self) -> u32 {
        90
    }

    fn filter(&self, ctx: &RoutingContext, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let healthy: Vec<Candidate> = candidates
            .iter()
            .filter(|c| {
                ctx.provider_health
                    .get(&c.provider.id)
                    .copied()
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        if healthy.is_empty() && !candidates.is_empty() {
            warn!("all candidate providers unhealthy; health filter overridden");
            candidates
        } else {
            healthy
        }
    }
}

/// Keeps models carrying every required capability.
pub struct CapabilityFilterStrategy;

impl RouteStrategy for CapabilityFilterStrategy {
    fn name(&self) -> &'static str {
        "capability_filter"
    }

    fn priority(&self) -> u32 {
        80
    }

    fn filter(&self, ctx: &RoutingContext, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let required = ctx.required_capabilities();
        candidates
            .into_iter()
            .filter(|c| c.model.has_all_capabilities(&required))
            .collect()
    }
}

/// Keeps models whose context window fits the estimated prompt plus reply
/// headroom, and rewards larger windows.
///
/// When nothing fits, the models tied at the globally largest window pass
/// through so the request still reaches the most capable option.
pub struct ContextWindowStrategy;

impl ContextWindowStrategy {
    fn required_window(ctx: &RoutingContext) -> u32 {
        (ctx.estimated_tokens.saturating_add(CONTEXT_HEADROOM_TOKENS))
            .max(ctx.min_context_window)
    }
}

impl RouteStrategy for ContextWindowStrategy {
    fn name(&self) -> &'static str {
        "context_window"
    }

    fn priority(&self) -> u32 {
        70
    }

    fn filter(&self, ctx: &RoutingContext, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let required = Self::required_window(ctx);
        let fitting: Vec<Candidate> = candidates
            .iter()
            .filter(|c| c.model.context_window >= required)
            .cloned()
            .collect();
        if !fitting.is_empty() {
            return fitting;
        }

        let largest = candidates
            .iter()
            .map(|c| c.model.context_window)
            .max()
            .unwrap_or(0);
        candidates
            .into_iter()
            .filter(|c| c.model.context_window == largest)
            .collect()
    }

    fn score(&self, _ctx: &RoutingContext, candidates: &mut [Candidate]) {
        let largest = candidates
            .iter()
            .map(|c| c.model.context_window)
            .max()
            .unwrap_or(0);
        if largest == 0 {
            return;
        }
        for candidate in candidates.iter_mut() {
            let bonus = 5.0 * candidate.model.context_window as f64 / largest as f64;
            candidate.add_score(self.name(), bonus);
        }
    }
}

/// Rewards cheap models when the caller asked for cost optimization.
pub struct CostOptimizationStrategy;

impl RouteStrategy for CostOptimizationStrategy {
    fn name(&self) -> &'static str {
        "cost_optimization"
    }

    fn priority(&self) -> u32 {
        50
    }

    fn score(&self, ctx: &RoutingContext, candidates: &mut [Candidate]) {
        if ctx.optimize != Some(OptimizeMode::Cost) {
            return;
        }
        let cheapest = candidates
            .iter()
            .map(|c| c.model.unit_cost())
            .filter(|cost| *cost > 0.0)
            .fold(f64::INFINITY, f64::min);
        if !cheapest.is_finite() {
            // all candidates are free; nothing to separate on
            return;
        }
        for candidate in candidates.iter_mut() {
            let cost = candidate.model.unit_cost();
            let bonus = if cost > 0.0 {
                20.0 * cheapest / cost
            } else {
                20.0
            };
            candidate.add_score(self.name(), bonus);
        }
    }
}

/// Adds bounded jitter to break exact ties without disturbing decisions
/// that differ by a real margin.
pub struct LoadBalancingStrategy;

impl RouteStrategy for LoadBalancingStrategy {
    fn name(&self) -> &'static str {
        "load_balancing"
    }

    fn priority(&self) -> u32 {
        10
    }

    fn score(&self, _ctx: &RoutingContext, candidates: &mut [Candidate]) {
        let mut rng = rand::thread_rng();
        for candidate in candidates.iter_mut() {
            candidate.score += rng.gen_range(0.0..0.1);
        }
    }
}

/// The default chain, strongest priority first.
pub fn default_strategies() -> Vec<Box<dyn RouteStrategy>> {
    vec![
        Box::new(UserPreferenceStrategy),
        Box::new(HealthFilterStrategy),
        Box::new(CapabilityFilterStrategy),
        Box::new(ContextWindowStrategy),
        Box::new(CostOptimizationStrategy),
        Box::new(LoadBalancingStrategy),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Capability, Model, Provider, ProviderType};
    use std::sync::Arc;

    fn candidate(model_id: &str, provider_id: &str, context_window: u32) -> Candidate {
        let provider = Provider::new(
            provider_id,
            provider_id,
            ProviderType::OpenAi,
            "http://localhost",
        );
        let model = Model::new(
            model_id,
            provider_id,
            vec![Capability::Chat, Capability::Stream],
            context_window,
        );
        Candidate::new(Arc::new(model), Arc::new(provider))
    }

    #[test]
    fn test_user_preference_filter_and_rank() {
        let strategy = UserPreferenceStrategy;
        let mut ctx = RoutingContext::default();
        ctx.preferred_models = vec!["a".to_string(), "b".to_string()];

        let candidates = vec![
            candidate("a", "p", 8192),
            candidate("b", "p", 8192),
            candidate("c", "p", 8192),
        ];
        let mut kept = strategy.filter(&ctx, candidates);
        assert_eq!(kept.len(), 2);

        strategy.score(&ctx, &mut kept);
        let a = kept.iter().find(|c| c.model.id == "a").unwrap();
        let b = kept.iter().find(|c| c.model.id == "b").unwrap();
        assert_eq!(a.score, 20.0);
        assert_eq!(b.score, 10.0);
    }

    #[test]
    fn test_user_preference_empty_intersection_falls_back() {
        let strategy = UserPreferenceStrategy;
        let mut ctx = RoutingContext::default();
        ctx.preferred_models = vec!["missing".to_string()];
        let kept = strategy.filter(&ctx, vec![candidate("a", "p", 8192)]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_health_filter_drops_unhealthy_providers() {
        let strategy = HealthFilterStrategy;
        let mut ctx = RoutingContext::default();
        ctx.provider_health.insert("bad".to_string(), false);
        ctx.provider_health.insert("good".to_string(), true);

        let kept = strategy.filter(
            &ctx,
            vec![
                candidate("a", "bad", 8192),
                candidate("b", "good", 8192),
                candidate("c", "unknown", 8192),
            ],
        );
        let ids: Vec<&str> = kept.iter().map(|c| c.model.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_health_filter_emergency_override() {
        let strategy = HealthFilterStrategy;
        let mut ctx = RoutingContext::default();
        ctx.provider_health.insert("p".to_string(), false);
        let kept = strategy.filter(&ctx, vec![candidate("a", "p", 8192)]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_capability_filter() {
        let strategy = CapabilityFilterStrategy;
        let mut ctx = RoutingContext::default();
        ctx.require_vision = true;
        let kept = strategy.filter(&ctx, vec![candidate("a", "p", 8192)]);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_context_window_boundary() {
        let strategy = ContextWindowStrategy;
        let mut ctx = RoutingContext::default();
        // exactly fits: window - headroom
        ctx.estimated_tokens = 128_000 - CONTEXT_HEADROOM_TOKENS;
        let kept = strategy.filter(&ctx, vec![candidate("a", "p", 128_000)]);
        assert_eq!(kept.len(), 1);

        // one token over: filtered, but largest-window fallback engages
        ctx.estimated_tokens = 128_000 - CONTEXT_HEADROOM_TOKENS + 1;
        let kept = strategy.filter(
            &ctx,
            vec![candidate("a", "p", 128_000), candidate("b", "p", 16_000)],
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].model.id, "a");
    }

    #[test]
    fn test_context_window_filters_small_models() {
        let strategy = ContextWindowStrategy;
        let mut ctx = RoutingContext::default();
        ctx.estimated_tokens = 50_000;
        let kept = strategy.filter(
            &ctx,
            vec![
                candidate("gpt-4o", "p", 128_000),
                candidate("gpt-3.5-turbo", "p", 16_000),
            ],
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].model.id, "gpt-4o");
    }

    #[test]
    fn test_min_context_window_floor() {
        let strategy = ContextWindowStrategy;
        let mut ctx = RoutingContext::default();
        ctx.min_context_window = 32_000;
        let kept = strategy.filter(
            &ctx,
            vec![candidate("small", "p", 16_000), candidate("big", "p", 64_000)],
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].model.id, "big");
    }

    #[test]
    fn test_cost_optimization_rewards_cheapest() {
        let strategy = CostOptimizationStrategy;
        let mut ctx = RoutingContext::default();
        ctx.optimize = Some(OptimizeMode::Cost);

        let mut candidates = vec![
            candidate("expensive", "p", 8192),
            candidate("cheap", "p", 8192),
        ];
        candidates[0].model = Arc::new(
            Model::new("expensive", "p", vec![Capability::Chat], 8192).with_costs(0.01, 0.01),
        );
        candidates[1].model = Arc::new(
            Model::new("cheap", "p", vec![Capability::Chat], 8192).with_costs(0.0001, 0.000275),
        );

        strategy.score(&ctx, &mut candidates);
        let expensive = candidates.iter().find(|c| c.model.id == "expensive").unwrap();
        let cheap = candidates.iter().find(|c| c.model.id == "cheap").unwrap();
        assert_eq!(cheap.score, 20.0);
        assert!(expensive.score < 1.0);
    }

    #[test]
    fn test_cost_optimization_noop_without_mode() {
        let strategy = CostOptimizationStrategy;
        let ctx = RoutingContext::default();
        let mut candidates = vec![candidate("a", "p", 8192)];
        strategy.score(&ctx, &mut candidates);
        assert_eq!(candidates[0].score, 0.0);
    }

    #[test]
    fn test_load_balancing_jitter_is_bounded() {
        let strategy = LoadBalancingStrategy;
        let ctx = RoutingContext::default();
        for _ in 0..50 {
            let mut candidates = vec![candidate("a", "p", 8192)];
            strategy.score(&ctx, &mut candidates);
            assert!(candidates[0].score >= 0.0);
            assert!(candidates[0].score < 0.1);
        }
    }

    #[test]
    fn test_default_chain_order() {
        let chain = default_strategies();
        let priorities: Vec<u32> = chain.iter().map(|s| s.priority()).collect();
        assert_eq!(priorities, vec![100, 90, 80, 70, 50, 10]);
    }
}
