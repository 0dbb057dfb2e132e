//! Background provider health monitor

use super::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::core::providers::AdapterRegistry;
use crate::core::registry::ModelRegistry;
use crate::core::types::{HealthStatus, Provider};
use crate::utils::error::{GatewayError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Health monitor configuration
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Interval between probe rounds
    pub check_interval: Duration,
    /// Consecutive failures that open a provider's circuit
    pub failure_threshold: u32,
    /// Successes needed to close a half-open circuit
    pub success_threshold: u32,
    /// Open-circuit cool-down before probing resumes
    pub timeout: Duration,
    /// Probe requests admitted while half-open
    pub max_half_open_requests: u32,
    /// Per-provider probe deadline
    pub probe_timeout: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            max_half_open_requests: 1,
            probe_timeout: Duration::from_secs(10),
        }
    }
}

impl HealthMonitorConfig {
    fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout: self.timeout,
            max_half_open_requests: self.max_half_open_requests,
        }
    }
}

#[derive(Debug, Clone)]
struct ProbeRecord {
    status: HealthStatus,
    last_check: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl Default for ProbeRecord {
    fn default() -> Self {
        Self {
            status: HealthStatus::Healthy,
            last_check: None,
            last_error: None,
        }
    }
}

/// Classifies providers and guards calls with per-provider circuit breakers.
///
/// Unknown providers are optimistically healthy: lack of data never blocks
/// routing.
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    records: DashMap<String, ProbeRecord>,
}

impl HealthMonitor {
    pub fn new(config: HealthMonitorConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
            records: DashMap::new(),
        }
    }

    /// Ensure breaker and record entries exist for a provider.
    pub fn register_provider(&self, provider_id: &str) {
        self.breaker(provider_id);
        self.records.entry(provider_id.to_string()).or_default();
    }

    fn breaker(&self, provider_id: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(provider_id.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    provider_id.to_string(),
                    self.config.breaker_config(),
                ))
            })
            .clone()
    }

    /// Whether routing may consider this provider.
    pub fn is_healthy(&self, provider_id: &str) -> bool {
        self.status(provider_id) != HealthStatus::Unhealthy
    }

    /// Current classification; unknown ids are healthy.
    pub fn status(&self, provider_id: &str) -> HealthStatus {
        let breaker_state = self.breakers.get(provider_id).map(|b| b.state());
        match breaker_state {
            Some(CircuitState::Open) => HealthStatus::Unhealthy,
            Some(CircuitState::HalfOpen) => HealthStatus::Degraded,
            _ => self
                .records
                .get(provider_id)
                .map(|r| r.status)
                .unwrap_or(HealthStatus::Healthy),
        }
    }

    /// Classification of every registered provider.
    pub fn all_health_status(&self) -> HashMap<String, HealthStatus> {
        self.records
            .iter()
            .map(|r| (r.key().clone(), self.status(r.key())))
            .collect()
    }

    /// Boolean health snapshot for the routing context.
    pub fn snapshot(&self) -> HashMap<String, bool> {
        self.records
            .iter()
            .map(|r| (r.key().clone(), self.is_healthy(r.key())))
            .collect()
    }

    /// Run `f` through the provider's circuit breaker.
    pub async fn execute<F, R>(&self, provider_id: &str, f: F) -> Result<R>
    where
        F: std::future::Future<Output = Result<R>>,
    {
        self.register_provider(provider_id);
        self.breaker(provider_id).call(f).await
    }

    /// Probe one provider through its adapter's `health_check`.
    pub async fn probe(&self, provider: &Provider, adapters: &AdapterRegistry) {
        let breaker = self.breaker(&provider.id);
        let probe_timeout = self.config.probe_timeout;

        let outcome = breaker
            .call(async {
                let adapter = adapters.get(provider.provider_type).ok_or_else(|| {
                    GatewayError::Unsupported(format!(
                        "no adapter for provider type {}",
                        provider.provider_type
                    ))
                })?;
                tokio::time::timeout(probe_timeout, adapter.health_check(provider))
                    .await
                    .map_err(|_| {
                        GatewayError::Timeout(format!(
                            "health probe for provider {} timed out",
                            provider.id
                        ))
                    })?
            })
            .await;

        let mut record = self.records.entry(provider.id.clone()).or_default();
        record.last_check = Some(Utc::now());
        match outcome {
            Ok(()) => {
                if record.status != HealthStatus::Healthy {
                    info!("provider {} back to healthy", provider.id);
                }
                record.status = HealthStatus::Healthy;
                record.last_error = None;
            }
            Err(e) => {
                if record.status != HealthStatus::Unhealthy {
                    warn!("provider {} marked unhealthy: {}", provider.id, e);
                }
                record.status = HealthStatus::Unhealthy;
                record.last_error = Some(e.to_string());
            }
        }
    }

    /// Spawn the periodic probe loop; terminates when `stop` flips true.
    pub fn spawn_check_loop(
        self: &Arc<Self>,
        registry: Arc<ModelRegistry>,
        adapters: Arc<AdapterRegistry>,
        mut stop: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.config.check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let providers = registry.all_providers();
                        debug!("running health checks for {} providers", providers.len());
                        for provider in providers {
                            monitor.probe(&provider, &adapters).await;
                        }
                    }
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            info!("health check loop stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
