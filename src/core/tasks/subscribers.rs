//! Task progress pub/sub
//!
//! Each subscriber owns a bounded channel. Notification never blocks the
//! task's worker: a full channel drops the update, a closed channel drops
//! the subscription. Unsubscribe goes through an opaque monotonic token.

use crate::core::types::{TaskError, TaskStatus};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// One committed task state change
#[derive(Debug, Clone)]
pub struct TaskUpdate {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub output: Option<Value>,
    pub error: Option<TaskError>,
}

/// Opaque handle identifying one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

/// Registry of per-task subscriber channels
pub struct SubscriberRegistry {
    next_token: AtomicU64,
    buffer: usize,
    channels: RwLock<HashMap<String, Vec<(u64, mpsc::Sender<TaskUpdate>)>>>,
    tokens: RwLock<HashMap<u64, String>>,
}

impl SubscriberRegistry {
    pub fn new(buffer: usize) -> Self {
        Self {
            next_token: AtomicU64::new(1),
            buffer: buffer.max(1),
            channels: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Register a subscriber for one task's updates.
    pub fn subscribe(&self, task_id: &str) -> (SubscriptionToken, mpsc::Receiver<TaskUpdate>) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.buffer);
        self.channels
            .write()
            .entry(task_id.to_string())
            .or_default()
            .push((token, sender));
        self.tokens.write().insert(token, task_id.to_string());
        (SubscriptionToken(token), receiver)
    }

    /// Remove the subscription identified by `token`. Unknown tokens are a
    /// no-op.
    pub fn unsubscribe(&self, token: SubscriptionToken) {
        let task_id = match self.tokens.write().remove(&token.0) {
            Some(task_id) => task_id,
            None => return,
        };
        let mut channels = self.channels.write();
        if let Some(subscribers) = channels.get_mut(&task_id) {
            subscribers.retain(|(id, _)| *id != token.0);
            if subscribers.is_empty() {
                channels.remove(&task_id);
            }
        }
    }

    /// Deliver an update to the task's subscribers without blocking.
    pub fn notify(&self, update: TaskUpdate) {
        // snapshot under the read lock; sends happen outside it
        let subscribers: Vec<(u64, mpsc::Sender<TaskUpdate>)> = match self
            .channels
            .read()
            .get(&update.task_id)
        {
            Some(subscribers) => subscribers.clone(),
            None => return,
        };

        let mut closed: Vec<u64> = Vec::new();
        for (token, sender) in subscribers {
            match sender.try_send(update.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(
                        task_id = %update.task_id,
                        "subscriber channel full; dropping update"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(token),
            }
        }
        for token in closed {
            self.unsubscribe(SubscriptionToken(token));
        }
    }

    /// Drop every subscription for a task (called after its terminal update).
    pub fn remove_task(&self, task_id: &str) {
        let removed = self.channels.write().remove(task_id);
        if let Some(subscribers) = removed {
            let mut tokens = self.tokens.write();
            for (token, _) in subscribers {
                tokens.remove(&token);
            }
        }
    }

    pub fn subscriber_count(&self, task_id: &str) -> usize {
        self.channels
            .read()
            .get(task_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
