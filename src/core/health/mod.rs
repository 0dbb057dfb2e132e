//! Provider health: circuit breakers and the background monitor

pub mod breaker;
pub mod monitor;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use monitor::{HealthMonitor, HealthMonitorConfig};
