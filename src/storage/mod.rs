//! Persistence ports
//!
//! The core talks to storage exclusively through these async traits.
//! Durable backends (SQL, Redis, ...) live outside the crate;
//! [`memory`] ships an in-memory reference implementation used by tests
//! and development setups.

pub mod memory;

use crate::core::types::{
    Group, HealthStatus, Model, Provider, ProviderAccount, Task, TaskStatus, TaskType,
};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Provider and model catalog persistence
#[async_trait]
pub trait ProviderRepository: Send + Sync {
    async fn create_provider(&self, provider: &Provider) -> Result<()>;
    async fn get_provider(&self, id: &str) -> Result<Option<Provider>>;
    async fn update_provider(&self, provider: &Provider) -> Result<()>;
    async fn delete_provider(&self, id: &str) -> Result<()>;

    async fn create_model(&self, model: &Model) -> Result<()>;
    async fn get_model(&self, id: &str) -> Result<Option<Model>>;
    async fn update_model(&self, model: &Model) -> Result<()>;
    async fn delete_model(&self, id: &str) -> Result<()>;

    /// Providers with their models eager-loaded; `enabled_only` filters both
    /// levels.
    async fn list_providers_with_models(
        &self,
        enabled_only: bool,
    ) -> Result<Vec<(Provider, Vec<Model>)>>;
}

/// Model group persistence
#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn create(&self, group: &Group) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Group>>;
    async fn update(&self, group: &Group) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn list(&self, enabled_only: bool) -> Result<Vec<Group>>;
}

/// Listing filter for tasks
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub owner_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub task_type: Option<TaskType>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Task persistence
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &Task) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Task>>;
    async fn update(&self, task: &Task) -> Result<()>;
    /// Partial write of status and progress only.
    async fn update_status(&self, id: &str, status: TaskStatus, progress: u8) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
    /// All tasks still in a non-terminal state, for startup recovery.
    async fn list_pending_or_running(&self) -> Result<Vec<Task>>;
    async fn list_by_external_task_id(&self, external_task_id: &str) -> Result<Vec<Task>>;
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>>;
    async fn count_by_owner_and_status(&self, owner_id: &str, status: TaskStatus) -> Result<u64>;
}

/// Credential account persistence.
///
/// `record_success` / `record_failure` MUST be atomic increments on the
/// backend; callers never read-modify-write counters through `update`.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn create(&self, account: &ProviderAccount) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<ProviderAccount>>;
    async fn update(&self, account: &ProviderAccount) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
    /// Active accounts for a provider, sorted by priority DESC then weight
    /// DESC.
    async fn get_active_by_provider(&self, provider_id: &str) -> Result<Vec<ProviderAccount>>;
    /// Write the health classification with its failure and streak counters.
    async fn update_health_status(
        &self,
        id: &str,
        status: HealthStatus,
        consecutive_failures: u32,
        success_streak: u32,
    ) -> Result<()>;
    /// Atomic: requests += 1, tokens += n, cost += c, consecutive_failures = 0.
    async fn record_success(&self, id: &str, tokens: u64, cost_usd: f64) -> Result<()>;
    /// Atomic: consecutive_failures += 1, last_failure_at = now.
    async fn record_failure(&self, id: &str) -> Result<()>;
    /// Upsert the `(account_id, date)` daily usage bucket.
    async fn record_daily_usage(&self, account_id: &str, tokens: u64, cost_usd: f64) -> Result<()>;
}

/// Bundle of the four ports as shared handles
#[derive(Clone)]
pub struct Repositories {
    pub providers: Arc<dyn ProviderRepository>,
    pub groups: Arc<dyn GroupRepository>,
    pub tasks: Arc<dyn TaskRepository>,
    pub accounts: Arc<dyn AccountRepository>,
}
