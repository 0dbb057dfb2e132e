//! Circuit breaker guarding calls to one provider

use crate::utils::error::{GatewayError, Result};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests pass through
    Closed,
    /// Failure threshold reached, requests are rejected until the cool-down
    Open,
    /// Cool-down elapsed, a bounded number of probe requests are allowed
    HalfOpen,
}

/// Circuit breaker thresholds
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Successes in half-open that close the circuit
    pub success_threshold: u32,
    /// Cool-down before half-open probing
    pub timeout: Duration,
    /// Concurrent requests admitted while half-open
    pub max_half_open_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            max_half_open_requests: 1,
        }
    }
}

/// Per-provider circuit breaker.
///
/// Counters are atomics; the state tag and failure timestamp sit behind a
/// mutex taken only on transitions and checks.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<CircuitState>,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    half_open_calls: AtomicU32,
    last_failure_time: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            half_open_calls: AtomicU32::new(0),
            last_failure_time: Mutex::new(None),
        }
    }

    /// Run `f` through the breaker, recording its outcome.
    ///
    /// Errors from `f` pass through unchanged; a rejected call returns
    /// `Unhealthy` without executing `f`.
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: std::future::Future<Output = Result<R>>,
    {
        if !self.try_acquire() {
            return Err(GatewayError::Unhealthy(format!(
                "circuit breaker open for provider {}",
                self.name
            )));
        }

        match f.await {
            Ok(result) => {
                self.on_success();
                Ok(result)
            }
            Err(error) => {
                self.on_failure();
                Err(error)
            }
        }
    }

    /// Whether a request may proceed right now, transitioning open → half-open
    /// when the cool-down has elapsed.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        match *state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let last_failure = *self
                    .last_failure_time
                    .lock()
                    .unwrap_or_else(|p| p.into_inner());
                match last_failure {
                    Some(at) if at.elapsed() >= self.config.timeout => {
                        debug!("circuit breaker {} transitioning to half-open", self.name);
                        *state = CircuitState::HalfOpen;
                        self.success_count.store(0, Ordering::Relaxed);
                        self.half_open_calls.store(1, Ordering::Relaxed);
                        true
                    }
                    _ => false,
                }
            }
            CircuitState::HalfOpen => {
                let calls = self.half_open_calls.fetch_add(1, Ordering::Relaxed);
                if calls < self.config.max_half_open_requests {
                    true
                } else {
                    self.half_open_calls.fetch_sub(1, Ordering::Relaxed);
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub fn on_success(&self) {
        let successes = self.success_count.fetch_add(1, Ordering::Relaxed) + 1;
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        match *state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {
                self.half_open_calls.fetch_sub(1, Ordering::Relaxed);
                if successes >= self.config.success_threshold {
                    debug!("circuit breaker {} closing", self.name);
                    *state = CircuitState::Closed;
                    self.failure_count.store(0, Ordering::Relaxed);
                    self.success_count.store(0, Ordering::Relaxed);
                    self.half_open_calls.store(0, Ordering::Relaxed);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn on_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        *self
            .last_failure_time
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(Instant::now());

        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        match *state {
            CircuitState::Closed => {
                if failures >= self.config.failure_threshold {
                    warn!(
                        "circuit breaker {} opening after {} consecutive failures",
                        self.name, failures
                    );
                    *state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!("circuit breaker {} reopening after probe failure", self.name);
                *state = CircuitState::Open;
                self.half_open_calls.store(0, Ordering::Relaxed);
                self.success_count.store(0, Ordering::Relaxed);
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}
