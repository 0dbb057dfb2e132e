//! Per-request routing context

use crate::core::types::{Capability, ChatRequest, TaskType};
use crate::utils::tokens;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// What the routing score should optimize for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizeMode {
    Cost,
    Quality,
    Speed,
    Latency,
}

impl OptimizeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizeMode::Cost => "cost",
            OptimizeMode::Quality => "quality",
            OptimizeMode::Speed => "speed",
            OptimizeMode::Latency => "latency",
        }
    }
}

/// Transient routing inputs for one request.
///
/// The health snapshot is injected by the router before the pipeline runs so
/// a single decision sees one consistent view.
#[derive(Debug, Clone)]
pub struct RoutingContext {
    pub task_type: TaskType,
    pub require_stream: bool,
    pub require_tools: bool,
    pub require_vision: bool,
    pub require_json_mode: bool,
    /// Estimated prompt token budget
    pub estimated_tokens: u32,
    /// Hard floor on the candidate's context window
    pub min_context_window: u32,
    pub optimize: Option<OptimizeMode>,
    /// When non-empty, only these providers are considered
    pub allowed_providers: Vec<String>,
    pub denied_providers: Vec<String>,
    /// Model ids in preference order, strongest first
    pub preferred_models: Vec<String>,
    pub group_id: Option<String>,
    /// Snapshot of provider health at decision time
    pub provider_health: HashMap<String, bool>,
    /// Models already tried by fallback re-routes
    pub excluded_models: HashSet<String>,
}

impl Default for RoutingContext {
    fn default() -> Self {
        Self {
            task_type: TaskType::Chat,
            require_stream: false,
            require_tools: false,
            require_vision: false,
            require_json_mode: false,
            estimated_tokens: 0,
            min_context_window: 0,
            optimize: None,
            allowed_providers: Vec::new(),
            denied_providers: Vec::new(),
            preferred_models: Vec::new(),
            group_id: None,
            provider_health: HashMap::new(),
            excluded_models: HashSet::new(),
        }
    }
}

impl RoutingContext {
    /// Derive a chat routing context from a request's declared needs.
    pub fn for_chat(request: &ChatRequest, stream: bool) -> Self {
        let mut ctx = Self {
            task_type: TaskType::Chat,
            require_stream: stream,
            require_tools: request.wants_tools(),
            require_vision: request.wants_vision(),
            require_json_mode: request.wants_json_mode(),
            estimated_tokens: tokens::estimate_messages(
                request.messages.iter().map(|m| &m.content),
            ),
            ..Default::default()
        };
        if let Some(model) = &request.model {
            if !model.is_empty() {
                ctx.preferred_models.push(model.clone());
            }
        }
        ctx
    }

    /// Context for a non-chat task type (embedding, image, video, audio).
    pub fn for_task(task_type: TaskType) -> Self {
        Self {
            task_type,
            ..Default::default()
        }
    }

    /// Capabilities a candidate model must carry for this request.
    pub fn required_capabilities(&self) -> Vec<Capability> {
        match self.task_type {
            TaskType::Chat => {
                let mut caps = vec![Capability::Chat];
                if self.require_stream {
                    caps.push(Capability::Stream);
                }
                if self.require_tools {
                    caps.push(Capability::Tools);
                }
                if self.require_vision {
                    caps.push(Capability::Vision);
                }
                if self.require_json_mode {
                    caps.push(Capability::JsonMode);
                }
                caps
            }
            other => vec![other.required_capability()],
        }
    }

    /// Whether the provider passes the allow/deny lists.
    pub fn provider_allowed(&self, provider_id: &str) -> bool {
        if self.denied_providers.iter().any(|p| p == provider_id) {
            return false;
        }
        self.allowed_providers.is_empty()
            || self.allowed_providers.iter().any(|p| p == provider_id)
    }
}
