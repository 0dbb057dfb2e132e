//! Model groups: named routing constraints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Credential/group selection strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    RoundRobin,
    #[serde(alias = "weighted_random")]
    Weighted,
    Priority,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionStrategy::RoundRobin => "round_robin",
            SelectionStrategy::Weighted => "weighted",
            SelectionStrategy::Priority => "priority",
        }
    }
}

/// Retry-on-failure policy attached to a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackPolicy {
    pub enabled: bool,
    /// Total attempts including the first; values <= 1 disable retries
    pub max_attempts: u32,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
        }
    }
}

/// A named set of models sharing a selection strategy and fallback policy.
///
/// Groups are purely routing constraints; tenant-facing group administration
/// lives outside the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    /// Candidate model ids, in preference order
    pub model_ids: Vec<String>,
    #[serde(default)]
    pub strategy: SelectionStrategy,
    #[serde(default)]
    pub fallback: FallbackPolicy,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    pub fn new(id: impl Into<String>, name: impl Into<String>, model_ids: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            model_ids,
            strategy: SelectionStrategy::default(),
            fallback: FallbackPolicy::default(),
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }
}

fn default_true() -> bool {
    true
}
