//! Account health state machine
//!
//! Pure transition functions over an account snapshot. The pool applies the
//! resulting classification through the repository's atomic writes; nothing
//! here mutates state.

use crate::core::types::{HealthStatus, ProviderAccount};
use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// Failures that demote a healthy account to degraded
pub const DEGRADED_FAILURE_THRESHOLD: u32 = 2;

/// Failures that demote a degraded account to unhealthy
pub const UNHEALTHY_FAILURE_THRESHOLD: u32 = 5;

/// Success streak that promotes a degraded account back to healthy
pub const RECOVERY_SUCCESS_STREAK: u32 = 3;

/// Latency that demotes a healthy account to degraded
pub const HIGH_LATENCY_MS: u64 = 3000;

/// Cool-down before an unhealthy account may serve a probe request
pub const UNHEALTHY_COOLDOWN_SECS: i64 = 30;

/// Outcome of applying one event to an account snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub success_streak: u32,
}

impl Transition {
    /// Whether anything differs from the snapshot
    pub fn differs_from(&self, account: &ProviderAccount) -> bool {
        self.status != account.health_status
            || self.consecutive_failures != account.consecutive_failures
            || self.success_streak != account.success_streak
    }
}

/// Apply a successful request to the snapshot.
pub fn on_success(account: &ProviderAccount) -> Transition {
    match account.health_status {
        // the streak only matters for degraded recovery; leaving it
        // untouched keeps healthy-path successes from dirtying the account
        HealthStatus::Healthy => Transition {
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
            success_streak: account.success_streak,
        },
        HealthStatus::Degraded => {
            let streak = account.success_streak + 1;
            if streak >= RECOVERY_SUCCESS_STREAK {
                Transition {
                    status: HealthStatus::Healthy,
                    consecutive_failures: 0,
                    success_streak: 0,
                }
            } else {
                Transition {
                    status: HealthStatus::Degraded,
                    consecutive_failures: 0,
                    success_streak: streak,
                }
            }
        }
        // a success implies the cool-down probe went through; the streak
        // counts the triggering success
        HealthStatus::Unhealthy => Transition {
            status: HealthStatus::Degraded,
            consecutive_failures: 0,
            success_streak: 1,
        },
    }
}

/// Apply a failed request to the snapshot.
pub fn on_failure(account: &ProviderAccount) -> Transition {
    let failures = account.consecutive_failures + 1;
    match account.health_status {
        HealthStatus::Healthy => {
            if failures >= DEGRADED_FAILURE_THRESHOLD {
                Transition {
                    status: HealthStatus::Degraded,
                    consecutive_failures: failures,
                    success_streak: 0,
                }
            } else {
                Transition {
                    status: HealthStatus::Healthy,
                    consecutive_failures: failures,
                    success_streak: 0,
                }
            }
        }
        HealthStatus::Degraded => {
            if failures >= UNHEALTHY_FAILURE_THRESHOLD {
                Transition {
                    status: HealthStatus::Unhealthy,
                    consecutive_failures: failures,
                    success_streak: 0,
                }
            } else {
                Transition {
                    status: HealthStatus::Degraded,
                    consecutive_failures: failures,
                    success_streak: 0,
                }
            }
        }
        HealthStatus::Unhealthy => Transition {
            status: HealthStatus::Unhealthy,
            consecutive_failures: failures,
            success_streak: 0,
        },
    }
}

/// Apply an observed latency to the snapshot. Only healthy accounts react.
pub fn on_latency(account: &ProviderAccount, latency_ms: u64) -> Option<Transition> {
    if account.health_status == HealthStatus::Healthy && latency_ms >= HIGH_LATENCY_MS {
        Some(Transition {
            status: HealthStatus::Degraded,
            consecutive_failures: account.consecutive_failures,
            success_streak: 0,
        })
    } else {
        None
    }
}

/// Whether the account may serve a request right now.
///
/// Unhealthy accounts become eligible again once the cool-down since the
/// last failure has elapsed (half-open probe).
pub fn can_attempt(account: &ProviderAccount, now: DateTime<Utc>) -> bool {
    if account.health_status != HealthStatus::Unhealthy {
        return true;
    }
    match account.last_failure_at {
        Some(at) => now - at >= ChronoDuration::seconds(UNHEALTHY_COOLDOWN_SECS),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_with(status: HealthStatus, failures: u32, streak: u32) -> ProviderAccount {
        let mut account = ProviderAccount::new("a1", "p1", "primary", "cipher", "sk-12345…");
        account.health_status = status;
        account.consecutive_failures = failures;
        account.success_streak = streak;
        account
    }

    #[test]
    fn test_first_failure_keeps_healthy() {
        let t = on_failure(&account_with(HealthStatus::Healthy, 0, 0));
        assert_eq!(t.status, HealthStatus::Healthy);
        assert_eq!(t.consecutive_failures, 1);
    }

    #[test]
    fn test_second_failure_degrades() {
        let t = on_failure(&account_with(HealthStatus::Healthy, 1, 0));
        assert_eq!(t.status, HealthStatus::Degraded);
        assert_eq!(t.consecutive_failures, 2);
        assert_eq!(t.success_streak, 0);
    }

    #[test]
    fn test_fifth_failure_turns_unhealthy() {
        let t = on_failure(&account_with(HealthStatus::Degraded, 4, 0));
        assert_eq!(t.status, HealthStatus::Unhealthy);
        assert_eq!(t.consecutive_failures, 5);
    }

    #[test]
    fn test_degraded_failure_below_threshold_stays_degraded() {
        let t = on_failure(&account_with(HealthStatus::Degraded, 2, 1));
        assert_eq!(t.status, HealthStatus::Degraded);
        assert_eq!(t.consecutive_failures, 3);
        assert_eq!(t.success_streak, 0);
    }

    #[test]
    fn test_degraded_recovers_at_exactly_three_successes() {
        let t = on_success(&account_with(HealthStatus::Degraded, 0, 1));
        assert_eq!(t.status, HealthStatus::Degraded);
        assert_eq!(t.success_streak, 2);

        let t = on_success(&account_with(HealthStatus::Degraded, 0, 2));
        assert_eq!(t.status, HealthStatus::Healthy);
        assert_eq!(t.success_streak, 0);
        assert_eq!(t.consecutive_failures, 0);
    }

    #[test]
    fn test_unhealthy_success_steps_to_degraded_with_streak_one() {
        let t = on_success(&account_with(HealthStatus::Unhealthy, 5, 0));
        assert_eq!(t.status, HealthStatus::Degraded);
        assert_eq!(t.success_streak, 1);
    }

    #[test]
    fn test_unhealthy_failure_stays_unhealthy() {
        let t = on_failure(&account_with(HealthStatus::Unhealthy, 5, 0));
        assert_eq!(t.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_high_latency_degrades_healthy_only() {
        let healthy = account_with(HealthStatus::Healthy, 0, 2);
        let t = on_latency(&healthy, 3000).unwrap();
        assert_eq!(t.status, HealthStatus::Degraded);
        assert_eq!(t.success_streak, 0);

        assert!(on_latency(&healthy, 2999).is_none());
        assert!(on_latency(&account_with(HealthStatus::Degraded, 0, 0), 5000).is_none());
    }

    #[test]
    fn test_can_attempt_respects_cooldown() {
        let now = Utc::now();
        let mut account = account_with(HealthStatus::Unhealthy, 5, 0);

        account.last_failure_at = Some(now - ChronoDuration::seconds(10));
        assert!(!can_attempt(&account, now));

        account.last_failure_at = Some(now - ChronoDuration::seconds(30));
        assert!(can_attempt(&account, now));

        account.health_status = HealthStatus::Degraded;
        account.last_failure_at = Some(now);
        assert!(can_attempt(&account, now));
    }
}
