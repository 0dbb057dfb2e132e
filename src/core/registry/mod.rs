//! In-memory provider/model registry
//!
//! The registry serves lookups from immutable index snapshots. A refresh
//! builds a complete replacement off-lock and swaps it in with one write,
//! so readers never observe a partially built catalog and a failed refresh
//! leaves the previous snapshot serving.

use crate::core::types::{Capability, Model, Provider};
use crate::storage::ProviderRepository;
use crate::utils::error::{GatewayError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Registry refresh configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Interval between background refreshes
    pub refresh_interval: Duration,
    /// Deadline for a single refresh
    pub refresh_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(300),
            refresh_timeout: Duration::from_secs(30),
        }
    }
}

/// One immutable catalog snapshot
#[derive(Default)]
struct Indexes {
    providers: HashMap<String, Arc<Provider>>,
    models: HashMap<String, Arc<Model>>,
    models_by_provider: HashMap<String, Vec<Arc<Model>>>,
    models_by_capability: HashMap<Capability, Vec<Arc<Model>>>,
}

impl Indexes {
    fn build(rows: Vec<(Provider, Vec<Model>)>) -> Self {
        let mut indexes = Indexes::default();
        for (provider, models) in rows {
            let provider = Arc::new(provider);
            for model in models {
                if !model.enabled {
                    continue;
                }
                let model = Arc::new(model);
                indexes
                    .models_by_provider
                    .entry(provider.id.clone())
                    .or_default()
                    .push(model.clone());
                for capability in &model.capabilities {
                    indexes
                        .models_by_capability
                        .entry(*capability)
                        .or_default()
                        .push(model.clone());
                }
                indexes.models.insert(model.id.clone(), model);
            }
            indexes.providers.insert(provider.id.clone(), provider);
        }
        // deterministic iteration for stable routing and idempotent refresh
        for bucket in indexes.models_by_provider.values_mut() {
            bucket.sort_by(|a, b| a.id.cmp(&b.id));
        }
        for bucket in indexes.models_by_capability.values_mut() {
            bucket.sort_by(|a, b| a.id.cmp(&b.id));
        }
        indexes
    }
}

/// Periodically refreshed provider/model catalog
pub struct ModelRegistry {
    repository: Arc<dyn ProviderRepository>,
    config: RegistryConfig,
    indexes: RwLock<Arc<Indexes>>,
}

impl ModelRegistry {
    pub fn new(repository: Arc<dyn ProviderRepository>, config: RegistryConfig) -> Self {
        Self {
            repository,
            config,
            indexes: RwLock::new(Arc::new(Indexes::default())),
        }
    }

    /// Rebuild the catalog from persistence.
    ///
    /// On any error the previous snapshot keeps serving.
    pub async fn refresh(&self) -> Result<()> {
        let rows = tokio::time::timeout(
            self.config.refresh_timeout,
            self.repository.list_providers_with_models(true),
        )
        .await
        .map_err(|_| GatewayError::Timeout("registry refresh timed out".to_string()))??;

        let built = Indexes::build(rows);
        let providers = built.providers.len();
        let models = built.models.len();
        *self.indexes.write() = Arc::new(built);

        debug!(providers, models, "registry refreshed");
        Ok(())
    }

    pub fn get_provider(&self, id: &str) -> Option<Arc<Provider>> {
        self.indexes.read().providers.get(id).cloned()
    }

    pub fn get_model(&self, id: &str) -> Option<Arc<Model>> {
        self.indexes.read().models.get(id).cloned()
    }

    /// Model together with its owning provider.
    pub fn get_model_with_provider(&self, id: &str) -> Option<(Arc<Model>, Arc<Provider>)> {
        let indexes = self.indexes.read();
        let model = indexes.models.get(id)?.clone();
        let provider = indexes.providers.get(&model.provider_id)?.clone();
        Some((model, provider))
    }

    pub fn models_by_provider(&self, provider_id: &str) -> Vec<Arc<Model>> {
        self.indexes
            .read()
            .models_by_provider
            .get(provider_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn models_by_capability(&self, capability: Capability) -> Vec<Arc<Model>> {
        self.indexes
            .read()
            .models_by_capability
            .get(&capability)
            .cloned()
            .unwrap_or_default()
    }

    /// Models supporting every capability in `capabilities` (AND semantics).
    /// An empty list returns all models.
    pub fn models_by_capabilities(&self, capabilities: &[Capability]) -> Vec<Arc<Model>> {
        if capabilities.is_empty() {
            return self.all_models();
        }
        let indexes = self.indexes.read();
        let seed = match indexes.models_by_capability.get(&capabilities[0]) {
            Some(bucket) => bucket,
            None => return Vec::new(),
        };
        seed.iter()
            .filter(|m| m.has_all_capabilities(&capabilities[1..]))
            .cloned()
            .collect()
    }

    pub fn all_providers(&self) -> Vec<Arc<Provider>> {
        let mut providers: Vec<Arc<Provider>> =
            self.indexes.read().providers.values().cloned().collect();
        providers.sort_by(|a, b| a.id.cmp(&b.id));
        providers
    }

    pub fn all_models(&self) -> Vec<Arc<Model>> {
        let mut models: Vec<Arc<Model>> =
            self.indexes.read().models.values().cloned().collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }

    /// Spawn the background refresh loop; terminates when `stop` flips true.
    pub fn spawn_refresh_loop(
        self: &Arc<Self>,
        mut stop: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(registry.config.refresh_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // the constructor-time refresh already populated the catalog
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = registry.refresh().await {
                            error!("background registry refresh failed: {}", e);
                        }
                    }
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            info!("registry refresh loop stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ProviderType;
    use crate::storage::memory::MemoryProviderRepository;

    async fn seeded_registry() -> (Arc<MemoryProviderRepository>, ModelRegistry) {
        let repo = Arc::new(MemoryProviderRepository::default());
        let provider = Provider::new("p1", "OpenAI", ProviderType::OpenAi, "https://api.openai.com/v1");
        repo.create_provider(&provider).await.unwrap();
        repo.create_model(&Model::new(
            "gpt-4o",
            "p1",
            vec![Capability::Chat, Capability::Stream, Capability::Vision],
            128_000,
        ))
        .await
        .unwrap();
        repo.create_model(&Model::new(
            "gpt-4o-mini",
            "p1",
            vec![Capability::Chat, Capability::Stream],
            128_000,
        ))
        .await
        .unwrap();
        repo.create_model(&Model::new(
            "text-embedding-3-small",
            "p1",
            vec![Capability::Embedding],
            8191,
        ))
        .await
        .unwrap();

        let registry = ModelRegistry::new(repo.clone(), RegistryConfig::default());
        registry.refresh().await.unwrap();
        (repo, registry)
    }

    #[tokio::test]
    async fn test_lookup_by_id() {
        let (_repo, registry) = seeded_registry().await;
        assert!(registry.get_provider("p1").is_some());
        assert!(registry.get_provider("nope").is_none());
        assert_eq!(registry.get_model("gpt-4o").unwrap().context_window, 128_000);

        let (model, provider) = registry.get_model_with_provider("gpt-4o-mini").unwrap();
        assert_eq!(model.provider_id, provider.id);
    }

    #[tokio::test]
    async fn test_capability_indexes() {
        let (_repo, registry) = seeded_registry().await;
        assert_eq!(registry.models_by_capability(Capability::Chat).len(), 2);
        assert_eq!(registry.models_by_capability(Capability::Embedding).len(), 1);
        assert_eq!(
            registry.models_by_capability(Capability::VideoGeneration).len(),
            0
        );

        let vision = registry.models_by_capabilities(&[Capability::Chat, Capability::Vision]);
        assert_eq!(vision.len(), 1);
        assert_eq!(vision[0].id, "gpt-4o");
    }

    #[tokio::test]
    async fn test_empty_capability_list_returns_all() {
        let (_repo, registry) = seeded_registry().await;
        assert_eq!(registry.models_by_capabilities(&[]).len(), 3);
    }

    #[tokio::test]
    async fn test_disabled_models_omitted_after_refresh() {
        let (repo, registry) = seeded_registry().await;
        let mut model = repo.get_model("gpt-4o").await.unwrap().unwrap();
        model.enabled = false;
        repo.update_model(&model).await.unwrap();

        registry.refresh().await.unwrap();
        assert!(registry.get_model("gpt-4o").is_none());
        assert_eq!(registry.models_by_capability(Capability::Chat).len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let (_repo, registry) = seeded_registry().await;
        let before: Vec<String> = registry.all_models().iter().map(|m| m.id.clone()).collect();
        registry.refresh().await.unwrap();
        registry.refresh().await.unwrap();
        let after: Vec<String> = registry.all_models().iter().map(|m| m.id.clone()).collect();
        assert_eq!(before, after);
        assert_eq!(registry.all_providers().len(), 1);
    }

    #[tokio::test]
    async fn test_every_model_resolves_to_enabled_provider() {
        let (repo, registry) = seeded_registry().await;
        for model in registry.all_models() {
            let provider = registry.get_provider(&model.provider_id).unwrap();
            assert!(provider.enabled);
        }

        let mut provider = repo.get_provider("p1").await.unwrap().unwrap();
        provider.enabled = false;
        repo.update_provider(&provider).await.unwrap();
        registry.refresh().await.unwrap();
        assert!(registry.all_models().is_empty());
        assert!(registry.get_provider("p1").is_none());
    }
}
