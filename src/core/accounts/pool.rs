//! Per-provider credential pool with pluggable selection strategies

use super::status;
use crate::core::types::{HealthStatus, ProviderAccount, SelectionStrategy};
use crate::storage::AccountRepository;
use crate::utils::crypto::{KeyCipher, key_prefix};
use crate::utils::error::{GatewayError, Result};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Credential pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Selection strategy applied to every provider's pool
    pub strategy: SelectionStrategy,
    /// TTL of the active-accounts cache per provider
    pub cache_ttl: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::RoundRobin,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

struct CachedAccounts {
    accounts: Vec<ProviderAccount>,
    fetched_at: Instant,
}

/// Scheduler over a provider's credential accounts.
///
/// Selection never blocks on the repository when the cache is warm; any
/// account mutation or health transition invalidates the affected provider's
/// cache entry.
pub struct AccountPool {
    repository: Arc<dyn AccountRepository>,
    cipher: Arc<KeyCipher>,
    config: PoolConfig,
    cache: RwLock<HashMap<String, CachedAccounts>>,
    cursors: DashMap<String, AtomicUsize>,
}

impl AccountPool {
    pub fn new(
        repository: Arc<dyn AccountRepository>,
        cipher: Arc<KeyCipher>,
        config: PoolConfig,
    ) -> Self {
        Self {
            repository,
            cipher,
            config,
            cache: RwLock::new(HashMap::new()),
            cursors: DashMap::new(),
        }
    }

    /// Select an account for the provider and materialize its plaintext key.
    pub async fn get_account(&self, provider_id: &str) -> Result<ProviderAccount> {
        let accounts = self.active_accounts(provider_id).await?;
        let now = Utc::now();
        let eligible: Vec<&ProviderAccount> = accounts
            .iter()
            .filter(|a| status::can_attempt(a, now))
            .collect();

        if eligible.is_empty() {
            return Err(GatewayError::Unhealthy(format!(
                "no available account for provider {}",
                provider_id
            )));
        }

        let selected = match self.config.strategy {
            SelectionStrategy::RoundRobin => self.select_round_robin(provider_id, &eligible),
            SelectionStrategy::Weighted => self.select_weighted(&eligible),
            SelectionStrategy::Priority => self.select_priority(&eligible),
        };

        let mut account = selected.clone();
        let plaintext = self.cipher.decrypt(&account.encrypted_api_key)?;
        account.api_key = Some(plaintext);
        debug!(
            "selected account {} ({}) for provider {}",
            account.id, account.key_prefix, provider_id
        );
        Ok(account)
    }

    /// Record a successful request and drive the health state machine.
    pub async fn mark_success(&self, account_id: &str, tokens: u64, cost_usd: f64) -> Result<()> {
        self.repository
            .record_success(account_id, tokens, cost_usd)
            .await?;
        self.repository
            .record_daily_usage(account_id, tokens, cost_usd)
            .await?;

        let account = self.require_account(account_id).await?;
        let transition = status::on_success(&account);
        self.apply_transition(&account, transition).await
    }

    /// Record a failed request and drive the health state machine.
    pub async fn mark_failure(&self, account_id: &str, error: &GatewayError) -> Result<()> {
        let account = self.require_account(account_id).await?;
        let transition = status::on_failure(&account);

        self.repository.record_failure(account_id).await?;
        if transition.status == HealthStatus::Unhealthy
            && account.health_status != HealthStatus::Unhealthy
        {
            warn!(
                "account {} for provider {} now unhealthy after {} consecutive failures: {}",
                account.id, account.provider_id, transition.consecutive_failures, error
            );
        }
        self.apply_transition(&account, transition).await
    }

    /// Record an observed request latency; demotes a slow healthy account.
    pub async fn observe_latency(&self, account_id: &str, latency_ms: u64) -> Result<()> {
        let account = self.require_account(account_id).await?;
        if let Some(transition) = status::on_latency(&account, latency_ms) {
            debug!(
                "account {} degraded on {}ms latency",
                account.id, latency_ms
            );
            self.apply_transition(&account, transition).await?;
        }
        Ok(())
    }

    /// Encrypt a plaintext key and store a new account for the provider.
    pub async fn create_account(
        &self,
        provider_id: &str,
        name: &str,
        plaintext_key: &str,
    ) -> Result<ProviderAccount> {
        let encrypted = self.cipher.encrypt(plaintext_key)?;
        let account = ProviderAccount::new(
            Uuid::new_v4().to_string(),
            provider_id,
            name,
            encrypted,
            key_prefix(plaintext_key),
        );
        self.repository.create(&account).await?;
        self.invalidate(provider_id);
        Ok(account)
    }

    /// Persist account mutations made by an admin path.
    pub async fn update_account(&self, account: &ProviderAccount) -> Result<()> {
        self.repository.update(account).await?;
        self.invalidate(&account.provider_id);
        Ok(())
    }

    /// Remove an account from its provider's pool.
    pub async fn remove_account(&self, account_id: &str) -> Result<()> {
        let account = self.require_account(account_id).await?;
        self.repository.delete(account_id).await?;
        self.invalidate(&account.provider_id);
        Ok(())
    }

    /// Drop the cached account list for a provider.
    pub fn invalidate(&self, provider_id: &str) {
        self.cache.write().remove(provider_id);
    }

    async fn active_accounts(&self, provider_id: &str) -> Result<Vec<ProviderAccount>> {
        {
            let cache = self.cache.read();
            if let Some(entry) = cache.get(provider_id) {
                if entry.fetched_at.elapsed() < self.config.cache_ttl {
                    return Ok(entry.accounts.clone());
                }
            }
        }

        let accounts = self.repository.get_active_by_provider(provider_id).await?;
        self.cache.write().insert(
            provider_id.to_string(),
            CachedAccounts {
                accounts: accounts.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(accounts)
    }

    async fn require_account(&self, account_id: &str) -> Result<ProviderAccount> {
        self.repository
            .get(account_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("account {}", account_id)))
    }

    async fn apply_transition(
        &self,
        account: &ProviderAccount,
        transition: status::Transition,
    ) -> Result<()> {
        if !transition.differs_from(account) {
            return Ok(());
        }
        self.repository
            .update_health_status(
                &account.id,
                transition.status,
                transition.consecutive_failures,
                transition.success_streak,
            )
            .await?;
        self.invalidate(&account.provider_id);
        Ok(())
    }

    fn select_round_robin<'a>(
        &self,
        provider_id: &str,
        eligible: &[&'a ProviderAccount],
    ) -> &'a ProviderAccount {
        let cursor = self
            .cursors
            .entry(provider_id.to_string())
            .or_insert_with(|| AtomicUsize::new(0));
        let index = cursor.fetch_add(1, Ordering::Relaxed) % eligible.len();
        eligible[index]
    }

    fn select_weighted<'a>(&self, eligible: &[&'a ProviderAccount]) -> &'a ProviderAccount {
        let total: f64 = eligible.iter().map(|a| a.weight.max(1) as f64).sum();
        let mut remaining = rand::thread_rng().gen_range(0.0..total);
        for account in eligible {
            remaining -= account.weight.max(1) as f64;
            if remaining <= 0.0 {
                return account;
            }
        }
        eligible[eligible.len() - 1]
    }

    fn select_priority<'a>(&self, eligible: &[&'a ProviderAccount]) -> &'a ProviderAccount {
        // repository sort order is priority DESC, weight DESC
        eligible
            .iter()
            .find(|a| a.health_status == HealthStatus::Healthy)
            .copied()
            .or_else(|| {
                eligible
                    .iter()
                    .find(|a| a.health_status == HealthStatus::Degraded)
                    .copied()
            })
            .unwrap_or(eligible[0])
    }
}
