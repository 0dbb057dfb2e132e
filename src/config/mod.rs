//! Configuration management for the gateway core
//!
//! Configuration is a plain serde aggregate loaded from YAML. Every field
//! has a default so an empty file is a valid configuration; durations are
//! written in seconds.

use crate::core::accounts::PoolConfig;
use crate::core::cache::EmbeddingCacheConfig;
use crate::core::health::HealthMonitorConfig;
use crate::core::registry::RegistryConfig;
use crate::core::tasks::TaskManagerConfig;
use crate::core::types::SelectionStrategy;
use crate::utils::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Top-level configuration aggregate
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistrySettings,
    #[serde(default)]
    pub health: HealthSettings,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub tasks: TaskSettings,
    #[serde(default)]
    pub encryption: EncryptionSettings,
    #[serde(default)]
    pub embedding_cache: EmbeddingCacheSettings,
}

impl Config {
    /// Load configuration from a YAML file.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {:?}", path);

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.registry.refresh_interval_secs == 0 {
            return Err(GatewayError::Config(
                "registry.refresh_interval_secs must be positive".to_string(),
            ));
        }
        if self.health.failure_threshold == 0 {
            return Err(GatewayError::Config(
                "health.failure_threshold must be positive".to_string(),
            ));
        }
        if self.tasks.max_concurrent == 0 {
            return Err(GatewayError::Config(
                "tasks.max_concurrent must be positive".to_string(),
            ));
        }
        if self.tasks.max_poll_attempts == 0 {
            return Err(GatewayError::Config(
                "tasks.max_poll_attempts must be positive".to_string(),
            ));
        }
        if let Some(key) = &self.encryption.key {
            if !key.is_empty() {
                // Fail fast on malformed keys instead of at first decrypt
                crate::utils::crypto::KeyCipher::from_base64(Some(key))?;
            }
        }
        Ok(())
    }
}

/// Registry refresh settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            refresh_timeout_secs: default_refresh_timeout(),
        }
    }
}

impl RegistrySettings {
    pub fn to_config(&self) -> RegistryConfig {
        RegistryConfig {
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            refresh_timeout: Duration::from_secs(self.refresh_timeout_secs),
        }
    }
}

/// Health monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Open-circuit cool-down before a probe is allowed
    #[serde(default = "default_breaker_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_half_open")]
    pub max_half_open_requests: u32,
    /// Per-provider probe deadline
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_secs: default_breaker_timeout(),
            max_half_open_requests: default_max_half_open(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl HealthSettings {
    pub fn to_config(&self) -> HealthMonitorConfig {
        HealthMonitorConfig {
            check_interval: Duration::from_secs(self.check_interval_secs),
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout: Duration::from_secs(self.timeout_secs),
            max_half_open_requests: self.max_half_open_requests,
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
        }
    }
}

/// Credential pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    #[serde(default)]
    pub strategy: SelectionStrategy,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::default(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

impl PoolSettings {
    pub fn to_config(&self) -> PoolConfig {
        PoolConfig {
            strategy: self.strategy,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
        }
    }
}

/// Task manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSettings {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            poll_interval_secs: default_poll_interval(),
            max_poll_attempts: default_max_poll_attempts(),
            poll_timeout_secs: default_poll_timeout(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

impl TaskSettings {
    pub fn to_config(&self) -> TaskManagerConfig {
        TaskManagerConfig {
            max_concurrent: self.max_concurrent,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            max_poll_attempts: self.max_poll_attempts,
            poll_timeout: Duration::from_secs(self.poll_timeout_secs),
            poll_tick_timeout: Duration::from_secs(30),
            subscriber_buffer: self.subscriber_buffer,
        }
    }
}

/// Credential encryption settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EncryptionSettings {
    /// Base64-encoded 32-byte key; absent or empty means plaintext storage
    /// (development mode only)
    #[serde(default)]
    pub key: Option<String>,
}

/// Embedding cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingCacheSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_embedding_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_embedding_max_entries")]
    pub max_entries: usize,
}

impl Default for EmbeddingCacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: default_embedding_ttl(),
            max_entries: default_embedding_max_entries(),
        }
    }
}

impl EmbeddingCacheSettings {
    pub fn to_config(&self) -> EmbeddingCacheConfig {
        EmbeddingCacheConfig {
            ttl: Duration::from_secs(self.ttl_secs),
            max_entries: self.max_entries,
        }
    }
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_refresh_timeout() -> u64 {
    30
}

fn default_check_interval() -> u64 {
    30
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_breaker_timeout() -> u64 {
    60
}

fn default_max_half_open() -> u32 {
    1
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_max_concurrent() -> usize {
    10
}

fn default_poll_interval() -> u64 {
    5
}

fn default_max_poll_attempts() -> u32 {
    360
}

fn default_poll_timeout() -> u64 {
    1800
}

fn default_subscriber_buffer() -> usize {
    16
}

fn default_embedding_ttl() -> u64 {
    3600
}

fn default_embedding_max_entries() -> usize {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_is_valid() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.registry.refresh_interval_secs, 300);
        assert_eq!(config.health.failure_threshold, 5);
        assert_eq!(config.tasks.max_concurrent, 10);
        assert_eq!(config.tasks.max_poll_attempts, 360);
        assert!(config.encryption.key.is_none());
        assert!(!config.embedding_cache.enabled);
    }

    #[test]
    fn test_partial_overrides() {
        let config = Config::from_yaml(
            "tasks:\n  max_concurrent: 4\npool:\n  strategy: weighted\n",
        )
        .unwrap();
        assert_eq!(config.tasks.max_concurrent, 4);
        assert_eq!(config.pool.strategy, SelectionStrategy::Weighted);
        // untouched sections keep defaults
        assert_eq!(config.tasks.poll_interval_secs, 5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::from_yaml("tasks:\n  max_concurrent: 0\n").is_err());
        assert!(Config::from_yaml("registry:\n  refresh_interval_secs: 0\n").is_err());
    }

    #[test]
    fn test_malformed_encryption_key_rejected() {
        assert!(Config::from_yaml("encryption:\n  key: \"not-base64!!\"\n").is_err());
    }

    #[tokio::test]
    async fn test_from_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "health:\n  check_interval_secs: 7").unwrap();
        let config = Config::from_file(file.path()).await.unwrap();
        assert_eq!(config.health.check_interval_secs, 7);
    }

    #[test]
    fn test_duration_conversion() {
        let config = Config::default();
        assert_eq!(
            config.registry.to_config().refresh_interval,
            Duration::from_secs(300)
        );
        assert_eq!(
            config.tasks.to_config().poll_timeout,
            Duration::from_secs(1800)
        );
    }
}
