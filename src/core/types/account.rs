//! Credential pool account types

use super::health::HealthStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single API key within a provider's credential pool.
///
/// The stored key is always the AES-256-GCM ciphertext; `api_key` holds the
/// decrypted value only between selection and the upstream call, is skipped
/// by serde, and is redacted from Debug output.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderAccount {
    /// Opaque unique id
    pub id: String,
    /// Owning provider id
    pub provider_id: String,
    /// Human name, unique within the provider
    pub name: String,
    /// AES-256-GCM ciphertext, base64 with 12-byte nonce prefix
    pub encrypted_api_key: String,
    /// First 8 key characters plus an ellipsis, for identification
    pub key_prefix: String,
    /// Scheduling weight, >= 1
    pub weight: u32,
    /// Scheduling priority, higher wins in the priority strategy
    pub priority: u32,
    /// Inactive accounts are never selected
    pub is_active: bool,
    /// Current health classification
    pub health_status: HealthStatus,
    /// Consecutive failures since the last success
    pub consecutive_failures: u32,
    /// Consecutive successes since the last failure, drives degraded recovery
    pub success_streak: u32,
    /// Timestamp of the most recent failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Timestamp of the most recent health evaluation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<DateTime<Utc>>,
    /// Requests-per-minute quota, 0 = unbounded
    pub rate_limit_rpm: u32,
    /// Tokens-per-minute quota, 0 = unbounded
    pub rate_limit_tpm: u32,
    /// Daily request quota, 0 = unbounded
    pub daily_limit: u64,
    /// Lifetime request count, monotonic
    pub total_requests: u64,
    /// Lifetime token count, monotonic
    pub total_tokens: u64,
    /// Lifetime spend in USD, monotonic
    pub total_cost_usd: f64,
    /// Transient decrypted key, populated at selection time only
    #[serde(skip)]
    pub api_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProviderAccount {
    /// Create an active, healthy account holding an already-encrypted key.
    pub fn new(
        id: impl Into<String>,
        provider_id: impl Into<String>,
        name: impl Into<String>,
        encrypted_api_key: impl Into<String>,
        key_prefix: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            provider_id: provider_id.into(),
            name: name.into(),
            encrypted_api_key: encrypted_api_key.into(),
            key_prefix: key_prefix.into(),
            weight: 1,
            priority: 0,
            is_active: true,
            health_status: HealthStatus::Healthy,
            consecutive_failures: 0,
            success_streak: 0,
            last_failure_at: None,
            last_health_check: None,
            rate_limit_rpm: 0,
            rate_limit_tpm: 0,
            daily_limit: 0,
            total_requests: 0,
            total_tokens: 0,
            total_cost_usd: 0.0,
            api_key: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

impl std::fmt::Debug for ProviderAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderAccount")
            .field("id", &self.id)
            .field("provider_id", &self.provider_id)
            .field("name", &self.name)
            .field("key_prefix", &self.key_prefix)
            .field("weight", &self.weight)
            .field("priority", &self.priority)
            .field("is_active", &self.is_active)
            .field("health_status", &self.health_status)
            .field("consecutive_failures", &self.consecutive_failures)
            .field("success_streak", &self.success_streak)
            .field("total_requests", &self.total_requests)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// One row of per-day usage accounting, keyed by `(account_id, date)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyUsage {
    pub account_id: String,
    /// Calendar date in UTC, `YYYY-MM-DD`
    pub date: String,
    pub requests: u64,
    pub tokens: u64,
    pub cost_usd: f64,
}
