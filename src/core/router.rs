//! Router facade: candidate seeding, pipeline execution, credential
//! resolution, and fallback retries

use crate::core::accounts::AccountPool;
use crate::core::health::HealthMonitor;
use crate::core::registry::ModelRegistry;
use crate::core::routing::pipeline::{Candidate, RoutingPipeline};
use crate::core::routing::{RoutingContext, RoutingResult};
use crate::core::types::FallbackPolicy;
use crate::storage::GroupRepository;
use crate::utils::error::{GatewayError, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Health-aware model router
pub struct ModelRouter {
    registry: Arc<ModelRegistry>,
    health: Arc<HealthMonitor>,
    groups: Arc<dyn GroupRepository>,
    pool: Option<Arc<AccountPool>>,
    pipeline: RoutingPipeline,
}

impl ModelRouter {
    pub fn new(
        registry: Arc<ModelRegistry>,
        health: Arc<HealthMonitor>,
        groups: Arc<dyn GroupRepository>,
        pool: Option<Arc<AccountPool>>,
    ) -> Self {
        Self {
            registry,
            health,
            groups,
            pool,
            pipeline: RoutingPipeline::default(),
        }
    }

    /// Route one request to a `(provider, model, credential)` choice.
    pub async fn route(&self, ctx: &mut RoutingContext) -> Result<RoutingResult> {
        if ctx.provider_health.is_empty() {
            ctx.provider_health = self.health.snapshot();
        }

        let seed = self.seed_candidates(ctx).await?;
        let winner = self.pipeline.run(ctx, seed)?;
        self.finish(winner).await
    }

    /// Route, execute, and retry alternate models on failure.
    ///
    /// Each failed attempt excludes the losing model and clears the
    /// preference list before re-routing, so the retry explores genuinely
    /// different candidates.
    pub async fn route_with_fallback<T, F, Fut>(
        &self,
        ctx: &mut RoutingContext,
        execute: F,
    ) -> Result<T>
    where
        F: Fn(RoutingResult) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let policy = self.effective_fallback(ctx).await;
        let max_attempts = if policy.enabled && policy.max_attempts > 1 {
            policy.max_attempts
        } else {
            1
        };

        let mut last_error: Option<GatewayError> = None;
        for attempt in 1..=max_attempts {
            let result = match self.route(ctx).await {
                Ok(result) => result,
                Err(route_err) => {
                    // re-route exhaustion reports the original failure
                    return Err(last_error.unwrap_or(route_err));
                }
            };
            let model_id = result.model.id.clone();

            match execute(result).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(model = %model_id, attempt, "fallback attempt succeeded");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!(model = %model_id, attempt, "execution failed: {}", e);
                    ctx.excluded_models.insert(model_id);
                    ctx.preferred_models.clear();
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            GatewayError::Internal("fallback loop exited without attempts".to_string())
        }))
    }

    /// Routing path for embedding/image/video/audio requests: capability
    /// lookup plus health filter and preference bias, without the full chat
    /// chain.
    pub async fn route_capability(&self, ctx: &mut RoutingContext) -> Result<RoutingResult> {
        if ctx.provider_health.is_empty() {
            ctx.provider_health = self.health.snapshot();
        }

        let capability = ctx.task_type.required_capability();
        let models = self.registry.models_by_capability(capability);
        let mut candidates = self.to_candidates(ctx, models);
        if candidates.is_empty() {
            return Err(GatewayError::Routing(format!(
                "no models with capability {}",
                capability
            )));
        }

        // health filter with the same emergency override as the chat chain
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
        if !healthy.is_empty() {
            candidates = healthy;
        }

        // preferred model bias, strongest preference first
        let winner = ctx
            .preferred_models
            .iter()
            .find_map(|preferred| {
                candidates
                    .iter()
                    .find(|c| c.model.id == *preferred)
                    .cloned()
            })
            .unwrap_or_else(|| candidates[0].clone());

        self.finish(winner).await
    }

    /// The health snapshot the next decision would use. Diagnostic surface.
    pub fn health_snapshot(&self) -> std::collections::HashMap<String, bool> {
        self.health.snapshot()
    }

    async fn seed_candidates(&self, ctx: &RoutingContext) -> Result<Vec<Candidate>> {
        let models = match &ctx.group_id {
            Some(group_id) => {
                let group = self
                    .groups
                    .get(group_id)
                    .await?
                    .ok_or_else(|| GatewayError::NotFound(format!("group {}", group_id)))?;
                // models missing from the registry are silently skipped
                group
                    .model_ids
                    .iter()
                    .filter_map(|id| self.registry.get_model(id))
                    .collect()
            }
            None => self
                .registry
                .models_by_capabilities(&ctx.required_capabilities()),
        };

        let candidates = self.to_candidates(ctx, models);
        if candidates.is_empty() {
            return Err(GatewayError::Routing(
                "no candidate models available".to_string(),
            ));
        }
        Ok(candidates)
    }

    fn to_candidates(
        &self,
        ctx: &RoutingContext,
        models: Vec<Arc<crate::core::types::Model>>,
    ) -> Vec<Candidate> {
        models
            .into_iter()
            .filter(|m| !ctx.excluded_models.contains(&m.id))
            .filter_map(|m| {
                let provider = self.registry.get_provider(&m.provider_id)?;
                if !provider.enabled || !ctx.provider_allowed(&provider.id) {
                    return None;
                }
                Some(Candidate::new(m, provider))
            })
            .collect()
    }

    async fn effective_fallback(&self, ctx: &RoutingContext) -> FallbackPolicy {
        if let Some(group_id) = &ctx.group_id {
            if let Ok(Some(group)) = self.groups.get(group_id).await {
                return group.fallback;
            }
        }
        FallbackPolicy::default()
    }

    async fn finish(&self, winner: Candidate) -> Result<RoutingResult> {
        let mut result = RoutingResult {
            score: winner.score,
            reason: winner.reason(),
            api_key: winner.provider.api_key.clone(),
            account_id: None,
            provider: winner.provider,
            model: winner.model,
        };
        self.resolve_credentials(&mut result).await?;
        Ok(result)
    }

    async fn resolve_credentials(&self, result: &mut RoutingResult) -> Result<()> {
        let pool = match &self.pool {
            Some(pool) => pool,
            None => return Ok(()),
        };
        match pool.get_account(&result.provider.id).await {
            Ok(account) => {
                result.api_key = account.api_key.clone().unwrap_or_default();
                result.account_id = Some(account.id);
                Ok(())
            }
            Err(GatewayError::Unhealthy(reason)) => {
                // empty or exhausted pool falls back to the provider key
                debug!(
                    provider = %result.provider.id,
                    "credential pool unavailable ({}); using provider key",
                    reason
                );
                Ok(())
            }
            Err(other) => Err(other),
        }
    }
}
