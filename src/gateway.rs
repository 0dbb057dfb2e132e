//! Gateway facade
//!
//! Composition root wiring the registry, health monitor, credential pool,
//! router, adapters, and task manager into the entry points the transport
//! layer calls. The HTTP surface itself lives outside this crate.

use crate::config::Config;
use crate::core::accounts::AccountPool;
use crate::core::cache::EmbeddingCache;
use crate::core::cost;
use crate::core::health::HealthMonitor;
use crate::core::providers::{AdapterRegistry, ChatStream, ProviderAdapter};
use crate::core::registry::ModelRegistry;
use crate::core::router::ModelRouter;
use crate::core::routing::{OptimizeMode, RoutingContext, RoutingResult};
use crate::core::tasks::{
    PollOutcome, SubscriptionToken, TaskManager, TaskPoller, TaskUpdate,
};
use crate::core::types::{
    ChatRequest, ChatResponse, EmbeddingData, EmbeddingRequest, EmbeddingResponse,
    ImageGenerationRequest, ImageGenerationResponse, Task, TaskType, Usage,
    VideoGenerationRequest,
};
use crate::storage::{Repositories, TaskFilter};
use crate::utils::crypto::KeyCipher;
use crate::utils::error::{GatewayError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Per-request routing knobs supplied by the caller
#[derive(Debug, Clone)]
pub struct RouteHints {
    /// Tenant/user on whose behalf the request runs
    pub owner_id: String,
    pub group_id: Option<String>,
    pub preferred_models: Vec<String>,
    pub optimize: Option<OptimizeMode>,
    pub allowed_providers: Vec<String>,
    pub denied_providers: Vec<String>,
    pub min_context_window: u32,
}

impl Default for RouteHints {
    fn default() -> Self {
        Self {
            owner_id: "anonymous".to_string(),
            group_id: None,
            preferred_models: Vec::new(),
            optimize: None,
            allowed_providers: Vec::new(),
            denied_providers: Vec::new(),
            min_context_window: 0,
        }
    }
}

/// The assembled gateway core
pub struct Gateway {
    registry: Arc<ModelRegistry>,
    health: Arc<HealthMonitor>,
    pool: Arc<AccountPool>,
    adapters: Arc<AdapterRegistry>,
    router: Arc<ModelRouter>,
    tasks: Arc<TaskManager>,
    embedding_cache: Option<Arc<EmbeddingCache>>,
    stop: watch::Sender<bool>,
}

impl Gateway {
    /// Assemble the core, load the catalog, recover interrupted tasks, and
    /// start the background loops.
    ///
    /// The first registry refresh surfaces its error here; later background
    /// refresh failures are logged while the retained catalog keeps serving.
    pub async fn new(config: Config, repositories: Repositories) -> Result<Arc<Self>> {
        let cipher = Arc::new(KeyCipher::from_base64(
            config.encryption.key.as_deref(),
        )?);

        let registry = Arc::new(ModelRegistry::new(
            repositories.providers.clone(),
            config.registry.to_config(),
        ));
        registry.refresh().await?;

        let health = Arc::new(HealthMonitor::new(config.health.to_config()));
        let pool = Arc::new(AccountPool::new(
            repositories.accounts.clone(),
            cipher,
            config.pool.to_config(),
        ));
        let adapters = Arc::new(AdapterRegistry::with_defaults());
        let router = Arc::new(ModelRouter::new(
            registry.clone(),
            health.clone(),
            repositories.groups.clone(),
            Some(pool.clone()),
        ));
        let tasks = TaskManager::new(repositories.tasks.clone(), config.tasks.to_config());

        tasks.register_poller(
            TaskType::VideoGeneration,
            Arc::new(VideoStatusPoller {
                registry: registry.clone(),
                adapters: adapters.clone(),
                pool: pool.clone(),
            }),
        );

        let embedding_cache = config
            .embedding_cache
            .enabled
            .then(|| Arc::new(EmbeddingCache::new(config.embedding_cache.to_config())));

        let (stop, _) = watch::channel(false);
        let gateway = Arc::new(Self {
            registry,
            health,
            pool,
            adapters,
            router,
            tasks,
            embedding_cache,
            stop,
        });

        gateway.tasks.recover_pending().await?;
        gateway.tasks.recover_external().await?;

        let _refresh_loop = gateway
            .registry
            .spawn_refresh_loop(gateway.stop.subscribe());
        let _check_loop = gateway.health.spawn_check_loop(
            gateway.registry.clone(),
            gateway.adapters.clone(),
            gateway.stop.subscribe(),
        );

        info!("gateway core started");
        Ok(gateway)
    }

    /// Stop background loops and task workers.
    pub fn shutdown(&self) {
        let _ = self.stop.send(true);
        self.tasks.stop();
        info!("gateway core stopping");
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn pool(&self) -> &Arc<AccountPool> {
        &self.pool
    }

    pub fn tasks(&self) -> &Arc<TaskManager> {
        &self.tasks
    }

    pub fn router(&self) -> &Arc<ModelRouter> {
        &self.router
    }

    /// Non-streaming chat completion with fallback.
    pub async fn chat(&self, hints: RouteHints, request: ChatRequest) -> Result<ChatResponse> {
        let mut ctx = RoutingContext::for_chat(&request, false);
        self.apply_hints(&mut ctx, &hints);

        let request = &request;
        self.router
            .route_with_fallback(&mut ctx, move |route| async move {
                self.execute_chat(route, request).await
            })
            .await
    }

    /// Streaming chat completion.
    ///
    /// The route is returned alongside the stream so the transport layer can
    /// announce the routing decision before relaying chunks. Fallback does
    /// not apply once chunks may have been observed.
    pub async fn chat_stream(
        &self,
        hints: RouteHints,
        request: ChatRequest,
    ) -> Result<(RoutingResult, ChatStream)> {
        let mut ctx = RoutingContext::for_chat(&request, true);
        self.apply_hints(&mut ctx, &hints);

        let route = self.router.route(&mut ctx).await?;
        let adapter = self.adapter_for(&route)?;

        let outcome = self
            .health
            .execute(
                &route.provider.id,
                adapter.chat_stream(&request, &route.model, &route.provider, &route.api_key),
            )
            .await;

        match outcome {
            Ok(stream) => {
                // stream usage is not known up front; count the request
                if let Some(account_id) = &route.account_id {
                    if let Err(e) = self.pool.mark_success(account_id, 0, 0.0).await {
                        warn!("failed to record stream usage: {}", e);
                    }
                }
                Ok((route, stream))
            }
            Err(e) => {
                self.record_failure(&route, &e).await;
                Err(e)
            }
        }
    }

    /// Embedding generation, optionally served from the content cache.
    pub async fn embeddings(
        &self,
        hints: RouteHints,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse> {
        if request.input.is_empty() {
            return Err(GatewayError::Routing("embedding input is empty".to_string()));
        }

        let mut ctx = RoutingContext::for_task(TaskType::Embedding);
        if let Some(model) = &request.model {
            if !model.is_empty() {
                ctx.preferred_models.push(model.clone());
            }
        }
        self.apply_hints(&mut ctx, &hints);

        let route = self.router.route_capability(&mut ctx).await?;

        let cache = match &self.embedding_cache {
            Some(cache) => cache,
            None => return self.execute_embed(&route, &request).await,
        };

        let mut vectors: Vec<Option<Vec<f32>>> = request
            .input
            .iter()
            .map(|input| cache.get(&hints.owner_id, &route.model.id, input))
            .collect();

        let miss_indices: Vec<usize> = vectors
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.is_none().then_some(i))
            .collect();

        let mut usage = None;
        if !miss_indices.is_empty() {
            let miss_request = EmbeddingRequest {
                model: request.model.clone(),
                input: miss_indices
                    .iter()
                    .map(|i| request.input[*i].clone())
                    .collect(),
                user: request.user.clone(),
            };
            let mut response = self.execute_embed(&route, &miss_request).await?;
            response.data.sort_by_key(|d| d.index);
            for (slot, data) in miss_indices.iter().zip(response.data) {
                cache.insert(&route.model.id, &request.input[*slot], data.embedding.clone());
                vectors[*slot] = Some(data.embedding);
            }
            usage = response.usage;
        }

        Ok(EmbeddingResponse {
            model: route.model.id.clone(),
            data: vectors
                .into_iter()
                .enumerate()
                .map(|(index, vector)| EmbeddingData {
                    index: index as u32,
                    embedding: vector.unwrap_or_default(),
                })
                .collect(),
            usage,
        })
    }

    /// Synchronous image generation.
    pub async fn generate_image(
        &self,
        hints: RouteHints,
        request: ImageGenerationRequest,
    ) -> Result<ImageGenerationResponse> {
        let mut ctx = RoutingContext::for_task(TaskType::ImageGeneration);
        if let Some(model) = &request.model {
            if !model.is_empty() {
                ctx.preferred_models.push(model.clone());
            }
        }
        self.apply_hints(&mut ctx, &hints);

        let route = self.router.route_capability(&mut ctx).await?;
        let adapter = self.adapter_for(&route)?;

        let outcome = self
            .health
            .execute(
                &route.provider.id,
                adapter.generate_image(&request, &route.model, &route.provider, &route.api_key),
            )
            .await;
        self.settle(&route, Usage::default(), outcome).await
    }

    /// Submit a video generation job and return the tracking task.
    ///
    /// The upstream accepts the job synchronously; completion is observed by
    /// the task manager's poller.
    pub async fn generate_video(
        &self,
        hints: RouteHints,
        request: VideoGenerationRequest,
    ) -> Result<Task> {
        let mut ctx = RoutingContext::for_task(TaskType::VideoGeneration);
        if let Some(model) = &request.model {
            if !model.is_empty() {
                ctx.preferred_models.push(model.clone());
            }
        }
        self.apply_hints(&mut ctx, &hints);

        let route = self.router.route_capability(&mut ctx).await?;
        let adapter = self.adapter_for(&route)?;

        let submission = self
            .health
            .execute(
                &route.provider.id,
                adapter.generate_video(&request, &route.model, &route.provider, &route.api_key),
            )
            .await;
        let submission = self.settle(&route, Usage::default(), submission).await?;

        let input = serde_json::to_value(&request)?;
        self.tasks
            .submit_external(
                &hints.owner_id,
                TaskType::VideoGeneration,
                input,
                &submission.external_task_id,
                &route.provider.id,
                &route.model.id,
            )
            .await
    }

    /// Fetch a task owned by the caller.
    pub async fn get_task(&self, owner_id: &str, task_id: &str) -> Result<Task> {
        let task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("task {}", task_id)))?;
        if task.owner_id != owner_id {
            return Err(GatewayError::Forbidden(format!(
                "task {} is not owned by caller",
                task_id
            )));
        }
        Ok(task)
    }

    /// List the caller's tasks.
    pub async fn list_tasks(&self, owner_id: &str, mut filter: TaskFilter) -> Result<Vec<Task>> {
        filter.owner_id = Some(owner_id.to_string());
        self.tasks.repository().list(&filter).await
    }

    /// Cancel a task owned by the caller.
    pub async fn cancel_task(&self, owner_id: &str, task_id: &str) -> Result<()> {
        self.get_task(owner_id, task_id).await?;
        self.tasks.cancel(task_id).await
    }

    /// Delete a terminal task owned by the caller.
    pub async fn delete_task(&self, owner_id: &str, task_id: &str) -> Result<()> {
        let task = self.get_task(owner_id, task_id).await?;
        if !task.is_terminal() {
            return Err(GatewayError::InvalidState(format!(
                "task {} is still {}",
                task_id, task.status
            )));
        }
        self.tasks.repository().delete(task_id).await
    }

    /// Subscribe to progress updates for a task owned by the caller.
    pub async fn subscribe_task(
        &self,
        owner_id: &str,
        task_id: &str,
    ) -> Result<(SubscriptionToken, mpsc::Receiver<TaskUpdate>)> {
        self.get_task(owner_id, task_id).await?;
        Ok(self.tasks.on_progress(task_id))
    }

    fn apply_hints(&self, ctx: &mut RoutingContext, hints: &RouteHints) {
        ctx.group_id = hints.group_id.clone();
        for model in &hints.preferred_models {
            if !ctx.preferred_models.contains(model) {
                ctx.preferred_models.push(model.clone());
            }
        }
        ctx.optimize = hints.optimize.or(ctx.optimize);
        ctx.allowed_providers = hints.allowed_providers.clone();
        ctx.denied_providers = hints.denied_providers.clone();
        ctx.min_context_window = ctx.min_context_window.max(hints.min_context_window);
    }

    fn adapter_for(&self, route: &RoutingResult) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(route.provider.provider_type)
            .ok_or_else(|| {
                GatewayError::Unsupported(format!(
                    "no adapter for provider type {}",
                    route.provider.provider_type
                ))
            })
    }

    async fn execute_chat(
        &self,
        route: RoutingResult,
        request: &ChatRequest,
    ) -> Result<ChatResponse> {
        let adapter = self.adapter_for(&route)?;
        let started = Instant::now();

        let outcome = self
            .health
            .execute(
                &route.provider.id,
                adapter.chat(request, &route.model, &route.provider, &route.api_key),
            )
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(response) => {
                let usage = response.usage.unwrap_or_default();
                self.record_success(&route, usage, latency_ms).await;
                Ok(response)
            }
            Err(e) => {
                self.record_failure(&route, &e).await;
                Err(e)
            }
        }
    }

    async fn execute_embed(
        &self,
        route: &RoutingResult,
        request: &EmbeddingRequest,
    ) -> Result<EmbeddingResponse> {
        let adapter = self.adapter_for(route)?;
        let outcome = self
            .health
            .execute(
                &route.provider.id,
                adapter.embed(request, &route.model, &route.provider, &route.api_key),
            )
            .await;
        let usage = outcome
            .as_ref()
            .ok()
            .and_then(|r| r.usage)
            .unwrap_or_default();
        self.settle(route, usage, outcome).await
    }

    /// Record the outcome against the account and pass the result through.
    async fn settle<T>(
        &self,
        route: &RoutingResult,
        usage: Usage,
        outcome: Result<T>,
    ) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.record_success(route, usage, 0).await;
                Ok(value)
            }
            Err(e) => {
                self.record_failure(route, &e).await;
                Err(e)
            }
        }
    }

    async fn record_success(&self, route: &RoutingResult, usage: Usage, latency_ms: u64) {
        let account_id = match &route.account_id {
            Some(account_id) => account_id,
            None => return,
        };
        let cost = cost::usage_cost(&route.model, &usage);
        if let Err(e) = self
            .pool
            .mark_success(account_id, usage.total_tokens as u64, cost)
            .await
        {
            warn!("failed to record account success: {}", e);
        }
        if latency_ms > 0 {
            if let Err(e) = self.pool.observe_latency(account_id, latency_ms).await {
                warn!("failed to record account latency: {}", e);
            }
        }
    }

    async fn record_failure(&self, route: &RoutingResult, error: &GatewayError) {
        if let Some(account_id) = &route.account_id {
            if let Err(e) = self.pool.mark_failure(account_id, error).await {
                warn!("failed to record account failure: {}", e);
            }
        }
    }
}

/// Poller translating task records into upstream video status lookups
struct VideoStatusPoller {
    registry: Arc<ModelRegistry>,
    adapters: Arc<AdapterRegistry>,
    pool: Arc<AccountPool>,
}

#[async_trait]
impl TaskPoller for VideoStatusPoller {
    async fn poll_status(&self, task: &Task) -> Result<PollOutcome> {
        let provider = self
            .registry
            .get_provider(&task.provider_id)
            .ok_or_else(|| {
                GatewayError::NotFound(format!("provider {}", task.provider_id))
            })?;
        let adapter = self
            .adapters
            .get(provider.provider_type)
            .ok_or_else(|| {
                GatewayError::Unsupported(format!(
                    "no adapter for provider type {}",
                    provider.provider_type
                ))
            })?;

        let api_key = match self.pool.get_account(&provider.id).await {
            Ok(account) => account.api_key.unwrap_or_default(),
            Err(GatewayError::Unhealthy(_)) => provider.api_key.clone(),
            Err(e) => return Err(e),
        };

        let status = adapter
            .get_video_status(&task.external_task_id, &provider, &api_key)
            .await?;
        Ok(status.into())
    }
}
