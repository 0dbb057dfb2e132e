//! In-memory reference implementation of the persistence ports
//!
//! Every mutation happens under the owning map shard's lock, which gives the
//! same atomic-update semantics the SQL backends provide with atomic column
//! expressions. Values handed out are clones; mutating them does not touch
//! the store.

use super::{
    AccountRepository, GroupRepository, ProviderRepository, Repositories, TaskFilter,
    TaskRepository,
};
use crate::core::types::account::DailyUsage;
use crate::core::types::{
    Group, HealthStatus, Model, Provider, ProviderAccount, Task, TaskStatus,
};
use crate::utils::error::{GatewayError, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;

/// All four in-memory repositories behind one constructor
#[derive(Default)]
pub struct MemoryStorage {
    pub providers: Arc<MemoryProviderRepository>,
    pub groups: Arc<MemoryGroupRepository>,
    pub tasks: Arc<MemoryTaskRepository>,
    pub accounts: Arc<MemoryAccountRepository>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// View the storage as the port bundle consumed by the gateway.
    pub fn repositories(&self) -> Repositories {
        Repositories {
            providers: self.providers.clone(),
            groups: self.groups.clone(),
            tasks: self.tasks.clone(),
            accounts: self.accounts.clone(),
        }
    }
}

/// In-memory provider/model catalog
#[derive(Default)]
pub struct MemoryProviderRepository {
    providers: DashMap<String, Provider>,
    models: DashMap<String, Model>,
}

#[async_trait]
impl ProviderRepository for MemoryProviderRepository {
    async fn create_provider(&self, provider: &Provider) -> Result<()> {
        self.providers
            .insert(provider.id.clone(), provider.clone());
        Ok(())
    }

    async fn get_provider(&self, id: &str) -> Result<Option<Provider>> {
        Ok(self.providers.get(id).map(|p| p.clone()))
    }

    async fn update_provider(&self, provider: &Provider) -> Result<()> {
        match self.providers.get_mut(&provider.id) {
            Some(mut entry) => {
                *entry = provider.clone();
                entry.updated_at = Utc::now();
                Ok(())
            }
            None => Err(GatewayError::NotFound(format!(
                "provider {}",
                provider.id
            ))),
        }
    }

    async fn delete_provider(&self, id: &str) -> Result<()> {
        self.providers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| GatewayError::NotFound(format!("provider {}", id)))
    }

    async fn create_model(&self, model: &Model) -> Result<()> {
        self.models.insert(model.id.clone(), model.clone());
        Ok(())
    }

    async fn get_model(&self, id: &str) -> Result<Option<Model>> {
        Ok(self.models.get(id).map(|m| m.clone()))
    }

    async fn update_model(&self, model: &Model) -> Result<()> {
        match self.models.get_mut(&model.id) {
            Some(mut entry) => {
                *entry = model.clone();
                Ok(())
            }
            None => Err(GatewayError::NotFound(format!("model {}", model.id))),
        }
    }

    async fn delete_model(&self, id: &str) -> Result<()> {
        self.models
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| GatewayError::NotFound(format!("model {}", id)))
    }

    async fn list_providers_with_models(
        &self,
        enabled_only: bool,
    ) -> Result<Vec<(Provider, Vec<Model>)>> {
        let mut result = Vec::new();
        for provider in self.providers.iter() {
            if enabled_only && !provider.enabled {
                continue;
            }
            let models: Vec<Model> = self
                .models
                .iter()
                .filter(|m| m.provider_id == provider.id && (!enabled_only || m.enabled))
                .map(|m| m.clone())
                .collect();
            result.push((provider.clone(), models));
        }
        result.sort_by(|a, b| a.0.id.cmp(&b.0.id));
        Ok(result)
    }
}

/// In-memory group store
#[derive(Default)]
pub struct MemoryGroupRepository {
    groups: DashMap<String, Group>,
}

#[async_trait]
impl GroupRepository for MemoryGroupRepository {
    async fn create(&self, group: &Group) -> Result<()> {
        self.groups.insert(group.id.clone(), group.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Group>> {
        Ok(self.groups.get(id).map(|g| g.clone()))
    }

    async fn update(&self, group: &Group) -> Result<()> {
        match self.groups.get_mut(&group.id) {
            Some(mut entry) => {
                *entry = group.clone();
                entry.updated_at = Utc::now();
                Ok(())
            }
            None => Err(GatewayError::NotFound(format!("group {}", group.id))),
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.groups
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| GatewayError::NotFound(format!("group {}", id)))
    }

    async fn list(&self, enabled_only: bool) -> Result<Vec<Group>> {
        let mut groups: Vec<Group> = self
            .groups
            .iter()
            .filter(|g| !enabled_only || g.enabled)
            .map(|g| g.clone())
            .collect();
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(groups)
    }
}

/// In-memory task store
#[derive(Default)]
pub struct MemoryTaskRepository {
    tasks: DashMap<String, Task>,
}

#[async_trait]
impl TaskRepository for MemoryTaskRepository {
    async fn create(&self, task: &Task) -> Result<()> {
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.get(id).map(|t| t.clone()))
    }

    async fn update(&self, task: &Task) -> Result<()> {
        match self.tasks.get_mut(&task.id) {
            Some(mut entry) => {
                *entry = task.clone();
                entry.updated_at = Utc::now();
                Ok(())
            }
            None => Err(GatewayError::NotFound(format!("task {}", task.id))),
        }
    }

    async fn update_status(&self, id: &str, status: TaskStatus, progress: u8) -> Result<()> {
        match self.tasks.get_mut(id) {
            Some(mut entry) => {
                entry.status = status;
                entry.progress = progress.min(100);
                entry.updated_at = Utc::now();
                Ok(())
            }
            None => Err(GatewayError::NotFound(format!("task {}", id))),
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.tasks
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| GatewayError::NotFound(format!("task {}", id)))
    }

    async fn list_pending_or_running(&self) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Running))
            .map(|t| t.clone())
            .collect())
    }

    async fn list_by_external_task_id(&self, external_task_id: &str) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .iter()
            .filter(|t| t.external_task_id == external_task_id)
            .map(|t| t.clone())
            .collect())
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| {
                filter
                    .owner_id
                    .as_ref()
                    .is_none_or(|owner| &t.owner_id == owner)
                    && filter.status.is_none_or(|s| t.status == s)
                    && filter.task_type.is_none_or(|ty| t.task_type == ty)
            })
            .map(|t| t.clone())
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let tasks: Vec<Task> = tasks
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(tasks)
    }

    async fn count_by_owner_and_status(
        &self,
        owner_id: &str,
        status: TaskStatus,
    ) -> Result<u64> {
        Ok(self
            .tasks
            .iter()
            .filter(|t| t.owner_id == owner_id && t.status == status)
            .count() as u64)
    }
}

/// In-memory account store with atomic counter semantics
#[derive(Default)]
pub struct MemoryAccountRepository {
    accounts: DashMap<String, ProviderAccount>,
    daily_usage: DashMap<(String, String), DailyUsage>,
}

#[async_trait]
impl AccountRepository for MemoryAccountRepository {
    async fn create(&self, account: &ProviderAccount) -> Result<()> {
        let mut stored = account.clone();
        stored.api_key = None;
        self.accounts.insert(stored.id.clone(), stored);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ProviderAccount>> {
        Ok(self.accounts.get(id).map(|a| a.clone()))
    }

    async fn update(&self, account: &ProviderAccount) -> Result<()> {
        match self.accounts.get_mut(&account.id) {
            Some(mut entry) => {
                let mut stored = account.clone();
                stored.api_key = None;
                // counters are owned by record_success/record_failure
                stored.total_requests = entry.total_requests;
                stored.total_tokens = entry.total_tokens;
                stored.total_cost_usd = entry.total_cost_usd;
                stored.updated_at = Utc::now();
                *entry = stored;
                Ok(())
            }
            None => Err(GatewayError::NotFound(format!("account {}", account.id))),
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.accounts
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| GatewayError::NotFound(format!("account {}", id)))
    }

    async fn get_active_by_provider(&self, provider_id: &str) -> Result<Vec<ProviderAccount>> {
        let mut accounts: Vec<ProviderAccount> = self
            .accounts
            .iter()
            .filter(|a| a.provider_id == provider_id && a.is_active)
            .map(|a| a.clone())
            .collect();
        accounts.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.weight.cmp(&a.weight))
                .then(a.id.cmp(&b.id))
        });
        Ok(accounts)
    }

    async fn update_health_status(
        &self,
        id: &str,
        status: HealthStatus,
        consecutive_failures: u32,
        success_streak: u32,
    ) -> Result<()> {
        match self.accounts.get_mut(id) {
            Some(mut entry) => {
                entry.health_status = status;
                entry.consecutive_failures = consecutive_failures;
                entry.success_streak = success_streak;
                entry.last_health_check = Some(Utc::now());
                entry.updated_at = Utc::now();
                Ok(())
            }
            None => Err(GatewayError::NotFound(format!("account {}", id))),
        }
    }

    async fn record_success(&self, id: &str, tokens: u64, cost_usd: f64) -> Result<()> {
        match self.accounts.get_mut(id) {
            Some(mut entry) => {
                entry.total_requests += 1;
                entry.total_tokens += tokens;
                entry.total_cost_usd += cost_usd;
                entry.consecutive_failures = 0;
                entry.updated_at = Utc::now();
                Ok(())
            }
            None => Err(GatewayError::NotFound(format!("account {}", id))),
        }
    }

    async fn record_failure(&self, id: &str) -> Result<()> {
        match self.accounts.get_mut(id) {
            Some(mut entry) => {
                entry.consecutive_failures += 1;
                entry.last_failure_at = Some(Utc::now());
                entry.updated_at = Utc::now();
                Ok(())
            }
            None => Err(GatewayError::NotFound(format!("account {}", id))),
        }
    }

    async fn record_daily_usage(
        &self,
        account_id: &str,
        tokens: u64,
        cost_usd: f64,
    ) -> Result<()> {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let key = (account_id.to_string(), date.clone());
        let mut entry = self.daily_usage.entry(key).or_insert_with(|| DailyUsage {
            account_id: account_id.to_string(),
            date,
            requests: 0,
            tokens: 0,
            cost_usd: 0.0,
        });
        entry.requests += 1;
        entry.tokens += tokens;
        entry.cost_usd += cost_usd;
        Ok(())
    }
}

impl MemoryAccountRepository {
    /// Daily usage rows for an account, newest first. Test/diagnostic helper.
    pub fn daily_usage_for(&self, account_id: &str) -> Vec<DailyUsage> {
        let mut rows: Vec<DailyUsage> = self
            .daily_usage
            .iter()
            .filter(|r| r.account_id == account_id)
            .map(|r| r.clone())
            .collect();
        rows.sort_by(|a, b| b.date.cmp(&a.date));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Capability, TaskType};
    use serde_json::json;

    #[tokio::test]
    async fn test_provider_crud() {
        let repo = MemoryProviderRepository::default();
        let provider = Provider::new("p1", "OpenAI", crate::core::types::ProviderType::OpenAi, "https://api.openai.com/v1");
        repo.create_provider(&provider).await.unwrap();
        assert!(repo.get_provider("p1").await.unwrap().is_some());
        assert!(repo.get_provider("missing").await.unwrap().is_none());
        repo.delete_provider("p1").await.unwrap();
        assert!(repo.delete_provider("p1").await.is_err());
    }

    #[tokio::test]
    async fn test_list_providers_with_models_filters_disabled() {
        let repo = MemoryProviderRepository::default();
        let mut provider = Provider::new("p1", "OpenAI", crate::core::types::ProviderType::OpenAi, "u");
        repo.create_provider(&provider).await.unwrap();

        let enabled = Model::new("m1", "p1", vec![Capability::Chat], 8192);
        let mut disabled = Model::new("m2", "p1", vec![Capability::Chat], 8192);
        disabled.enabled = false;
        repo.create_model(&enabled).await.unwrap();
        repo.create_model(&disabled).await.unwrap();

        let rows = repo.list_providers_with_models(true).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.len(), 1);
        assert_eq!(rows[0].1[0].id, "m1");

        provider.enabled = false;
        repo.update_provider(&provider).await.unwrap();
        assert!(repo.list_providers_with_models(true).await.unwrap().is_empty());
        // disabled rows still visible without the filter
        assert_eq!(repo.list_providers_with_models(false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_task_update_status_clamps_progress() {
        let repo = MemoryTaskRepository::default();
        let task = Task::new("u1", TaskType::ImageGeneration, json!({}));
        repo.create(&task).await.unwrap();
        repo.update_status(&task.id, TaskStatus::Running, 150).await.unwrap();
        let stored = repo.get(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.progress, 100);
        assert_eq!(stored.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_task_filters() {
        let repo = MemoryTaskRepository::default();
        for owner in ["a", "a", "b"] {
            repo.create(&Task::new(owner, TaskType::Chat, json!({}))).await.unwrap();
        }
        let filter = TaskFilter {
            owner_id: Some("a".to_string()),
            ..Default::default()
        };
        assert_eq!(repo.list(&filter).await.unwrap().len(), 2);
        assert_eq!(
            repo.count_by_owner_and_status("a", TaskStatus::Pending).await.unwrap(),
            2
        );
        assert_eq!(repo.list_pending_or_running().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_account_counters_are_monotonic_and_atomic() {
        let repo = Arc::new(MemoryAccountRepository::default());
        let account = ProviderAccount::new("a1", "p1", "primary", "cipher", "sk-12345…");
        repo.create(&account).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.record_success("a1", 10, 0.01).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = repo.get("a1").await.unwrap().unwrap();
        assert_eq!(stored.total_requests, 16);
        assert_eq!(stored.total_tokens, 160);
        assert!((stored.total_cost_usd - 0.16).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_update_does_not_clobber_counters() {
        let repo = MemoryAccountRepository::default();
        let account = ProviderAccount::new("a1", "p1", "primary", "cipher", "sk-12345…");
        repo.create(&account).await.unwrap();
        repo.record_success("a1", 100, 0.5).await.unwrap();

        // stale snapshot written back concurrently
        let stale = account.clone();
        repo.update(&stale).await.unwrap();

        let stored = repo.get("a1").await.unwrap().unwrap();
        assert_eq!(stored.total_requests, 1);
        assert_eq!(stored.total_tokens, 100);
    }

    #[tokio::test]
    async fn test_plaintext_key_never_stored() {
        let repo = MemoryAccountRepository::default();
        let mut account = ProviderAccount::new("a1", "p1", "primary", "cipher", "sk-12345…");
        account.api_key = Some("sk-plaintext".to_string());
        repo.create(&account).await.unwrap();
        assert!(repo.get("a1").await.unwrap().unwrap().api_key.is_none());

        account.name = "renamed".to_string();
        repo.update(&account).await.unwrap();
        assert!(repo.get("a1").await.unwrap().unwrap().api_key.is_none());
    }

    #[tokio::test]
    async fn test_active_accounts_sorted_by_priority_then_weight() {
        let repo = MemoryAccountRepository::default();
        repo.create(&ProviderAccount::new("low", "p1", "low", "c", "k…").with_priority(1))
            .await
            .unwrap();
        repo.create(
            &ProviderAccount::new("heavy", "p1", "heavy", "c", "k…")
                .with_priority(5)
                .with_weight(2),
        )
        .await
        .unwrap();
        repo.create(
            &ProviderAccount::new("light", "p1", "light", "c", "k…").with_priority(5),
        )
        .await
        .unwrap();
        let mut inactive = ProviderAccount::new("off", "p1", "off", "c", "k…");
        inactive.is_active = false;
        repo.create(&inactive).await.unwrap();

        let accounts = repo.get_active_by_provider("p1").await.unwrap();
        let ids: Vec<&str> = accounts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["heavy", "light", "low"]);
    }

    #[tokio::test]
    async fn test_daily_usage_upsert() {
        let repo = MemoryAccountRepository::default();
        repo.record_daily_usage("a1", 100, 0.1).await.unwrap();
        repo.record_daily_usage("a1", 50, 0.05).await.unwrap();
        let rows = repo.daily_usage_for("a1");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].requests, 2);
        assert_eq!(rows[0].tokens, 150);
    }
}
