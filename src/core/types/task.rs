//! Asynchronous task types

use super::provider::Capability;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kinds of asynchronous work the task manager executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Chat,
    ImageGeneration,
    VideoGeneration,
    AudioGeneration,
    Embedding,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Chat => "chat",
            TaskType::ImageGeneration => "image_generation",
            TaskType::VideoGeneration => "video_generation",
            TaskType::AudioGeneration => "audio_generation",
            TaskType::Embedding => "embedding",
        }
    }

    /// The model capability a task of this type routes on
    pub fn required_capability(&self) -> Capability {
        match self {
            TaskType::Chat => Capability::Chat,
            TaskType::ImageGeneration => Capability::ImageGeneration,
            TaskType::VideoGeneration => Capability::VideoGeneration,
            TaskType::AudioGeneration => Capability::AudioGeneration,
            TaskType::Embedding => Capability::Embedding,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured task failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub code: String,
    pub message: String,
}

impl TaskError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Error recorded when a local executor returns an error
    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::new("execution_failed", message)
    }

    /// Error recorded when the upstream reports a failed job
    pub fn upstream_failed(message: impl Into<String>) -> Self {
        Self::new("upstream_failed", message)
    }
}

/// A persisted unit of asynchronous generation work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Owning user id
    pub owner_id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Completion percentage in [0, 100]
    pub progress: u8,
    /// Opaque request payload
    pub input: Value,
    /// Opaque result payload, present on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Present iff status is failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    /// Upstream job id; non-empty when the task is externally owned
    #[serde(default)]
    pub external_task_id: String,
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub model_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending local task.
    pub fn new(owner_id: impl Into<String>, task_type: TaskType, input: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            task_type,
            status: TaskStatus::Pending,
            progress: 0,
            input,
            output: None,
            error: None,
            external_task_id: String::new(),
            provider_id: String::new(),
            model_id: String::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Create a running task already accepted by an upstream async job.
    pub fn new_external(
        owner_id: impl Into<String>,
        task_type: TaskType,
        input: Value,
        external_task_id: impl Into<String>,
        provider_id: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        let mut task = Self::new(owner_id, task_type, input);
        task.status = TaskStatus::Running;
        task.external_task_id = external_task_id.into();
        task.provider_id = provider_id.into();
        task.model_id = model_id.into();
        task
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether this task is tracked by polling an upstream job
    pub fn is_external(&self) -> bool {
        !self.external_task_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_tags() {
        assert_eq!(TaskStatus::Pending.as_str(), "pending");
        assert_eq!(
            serde_json::to_string(&TaskStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }

    #[test]
    fn test_type_tags() {
        assert_eq!(TaskType::VideoGeneration.as_str(), "video_generation");
        assert_eq!(
            serde_json::from_str::<TaskType>("\"image_generation\"").unwrap(),
            TaskType::ImageGeneration
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_new_task_shape() {
        let task = Task::new("user-1", TaskType::ImageGeneration, json!({"prompt": "cat"}));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);
        assert!(!task.is_external());
        assert!(task.error.is_none());
    }

    #[test]
    fn test_external_task_starts_running() {
        let task = Task::new_external(
            "user-1",
            TaskType::VideoGeneration,
            json!({}),
            "ext-123",
            "p1",
            "video-1",
        );
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.is_external());
    }

    #[test]
    fn test_type_field_serializes_as_type() {
        let task = Task::new("u", TaskType::Chat, json!({}));
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["type"], "chat");
    }
}
