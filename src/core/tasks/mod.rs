//! Asynchronous task execution and tracking

pub mod manager;
pub mod subscribers;

pub use manager::{ProgressHandle, TaskManager, TaskManagerConfig};
pub use subscribers::{SubscriptionToken, TaskUpdate};

use crate::core::types::{Task, VideoStatus};
use crate::utils::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

/// Cooperative cancellation signal observed by executors and pollers
#[derive(Clone)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
    _keepalive: Option<std::sync::Arc<watch::Sender<bool>>>,
}

impl CancelSignal {
    pub(crate) fn new(receiver: watch::Receiver<bool>) -> Self {
        Self {
            receiver,
            _keepalive: None,
        }
    }

    /// Signal that never fires, for work outside the manager's control.
    pub fn never() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            receiver,
            _keepalive: Some(std::sync::Arc::new(sender)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once cancellation is requested.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        while !*receiver.borrow() {
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

/// In-process work keyed by task type.
///
/// The returned value becomes the task's output payload. Executors observe
/// cancellation cooperatively and should report progress as they go.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        task: &Task,
        progress: &ProgressHandle,
        cancel: &CancelSignal,
    ) -> Result<Value>;
}

/// One observation of an upstream asynchronous job
#[derive(Debug, Clone, Default)]
pub struct PollOutcome {
    pub progress: u8,
    pub completed: bool,
    pub output: Option<Value>,
    /// Upstream-reported terminal failure
    pub error: Option<String>,
}

impl From<VideoStatus> for PollOutcome {
    fn from(status: VideoStatus) -> Self {
        Self {
            progress: status.progress,
            completed: status.completed,
            output: status.output,
            error: status.error,
        }
    }
}

/// Upstream status source for externally owned tasks, keyed by task type.
#[async_trait]
pub trait TaskPoller: Send + Sync {
    async fn poll_status(&self, task: &Task) -> Result<PollOutcome>;
}
