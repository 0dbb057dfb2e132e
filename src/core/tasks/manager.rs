//! Task manager: bounded workers, external-job polling, recovery

use super::subscribers::{SubscriberRegistry, SubscriptionToken, TaskUpdate};
use super::{CancelSignal, TaskExecutor, TaskPoller};
use crate::core::types::{Task, TaskError, TaskStatus, TaskType};
use crate::storage::TaskRepository;
use crate::utils::error::{GatewayError, Result};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc, watch};
use tracing::{debug, error, info, warn};

/// Task manager configuration
#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
    /// Worker admission gate capacity
    pub max_concurrent: usize,
    /// Interval between external poll ticks
    pub poll_interval: Duration,
    /// Poll tick budget per task; attempts count on every tick
    pub max_poll_attempts: u32,
    /// Wall-clock budget for one external task's polling
    pub poll_timeout: Duration,
    /// Deadline for a single poll call
    pub poll_tick_timeout: Duration,
    /// Per-subscriber channel capacity
    pub subscriber_buffer: usize,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            poll_interval: Duration::from_secs(5),
            max_poll_attempts: 360,
            poll_timeout: Duration::from_secs(1800),
            poll_tick_timeout: Duration::from_secs(30),
            subscriber_buffer: 16,
        }
    }
}

/// Progress reporting handle handed to local executors.
///
/// Every report persists the clamped progress and notifies subscribers;
/// persistence errors are logged without interrupting the executor.
pub struct ProgressHandle {
    repository: Arc<dyn TaskRepository>,
    subscribers: Arc<SubscriberRegistry>,
    task_id: String,
}

impl ProgressHandle {
    pub async fn report(&self, progress: u8) {
        let progress = progress.min(100);
        if let Err(e) = self
            .repository
            .update_status(&self.task_id, TaskStatus::Running, progress)
            .await
        {
            error!(task_id = %self.task_id, "failed to persist progress: {}", e);
            return;
        }
        self.subscribers.notify(TaskUpdate {
            task_id: self.task_id.clone(),
            status: TaskStatus::Running,
            progress,
            output: None,
            error: None,
        });
    }
}

/// Supervises asynchronous generation work to terminal state.
pub struct TaskManager {
    repository: Arc<dyn TaskRepository>,
    config: TaskManagerConfig,
    semaphore: Arc<Semaphore>,
    executors: RwLock<HashMap<TaskType, Arc<dyn TaskExecutor>>>,
    pollers: RwLock<HashMap<TaskType, Arc<dyn TaskPoller>>>,
    subscribers: Arc<SubscriberRegistry>,
    cancels: DashMap<String, watch::Sender<bool>>,
    stop: watch::Sender<bool>,
}

impl TaskManager {
    pub fn new(repository: Arc<dyn TaskRepository>, config: TaskManagerConfig) -> Arc<Self> {
        let (stop, _) = watch::channel(false);
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            subscribers: Arc::new(SubscriberRegistry::new(config.subscriber_buffer)),
            repository,
            config,
            executors: RwLock::new(HashMap::new()),
            pollers: RwLock::new(HashMap::new()),
            cancels: DashMap::new(),
            stop,
        })
    }

    /// The task repository this manager persists through.
    pub fn repository(&self) -> &Arc<dyn TaskRepository> {
        &self.repository
    }

    /// Register the in-process executor for a task type.
    pub fn register_executor(&self, task_type: TaskType, executor: Arc<dyn TaskExecutor>) {
        self.executors.write().insert(task_type, executor);
    }

    /// Register the upstream poller for a task type.
    pub fn register_poller(&self, task_type: TaskType, poller: Arc<dyn TaskPoller>) {
        self.pollers.write().insert(task_type, poller);
    }

    /// Create a pending task and enqueue a worker for it. Never blocks on
    /// the admission gate; the worker acquires its permit.
    pub async fn submit(
        self: &Arc<Self>,
        owner_id: &str,
        task_type: TaskType,
        input: Value,
    ) -> Result<Task> {
        let task = Task::new(owner_id, task_type, input);
        self.repository.create(&task).await?;
        debug!(task_id = %task.id, task_type = %task_type, "task submitted");
        self.spawn_local_worker(task.id.clone());
        Ok(task)
    }

    /// Track a job already accepted by an upstream provider.
    pub async fn submit_external(
        self: &Arc<Self>,
        owner_id: &str,
        task_type: TaskType,
        input: Value,
        external_task_id: &str,
        provider_id: &str,
        model_id: &str,
    ) -> Result<Task> {
        let task = Task::new_external(
            owner_id,
            task_type,
            input,
            external_task_id,
            provider_id,
            model_id,
        );
        self.repository.create(&task).await?;
        debug!(task_id = %task.id, external_task_id, "external task submitted");
        self.spawn_poll_worker(task.id.clone());
        Ok(task)
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        self.repository.get(task_id).await
    }

    /// Cancel a task. Running work observes the cancellation cooperatively.
    pub async fn cancel(&self, task_id: &str) -> Result<()> {
        let task = self
            .repository
            .get(task_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("task {}", task_id)))?;
        if task.is_terminal() {
            return Err(GatewayError::InvalidState(format!(
                "task {} already terminal",
                task_id
            )));
        }

        self.repository
            .update_status(task_id, TaskStatus::Cancelled, task.progress)
            .await?;
        if let Some(cancel) = self.cancels.get(task_id) {
            let _ = cancel.send(true);
        }
        self.subscribers.notify(TaskUpdate {
            task_id: task_id.to_string(),
            status: TaskStatus::Cancelled,
            progress: task.progress,
            output: None,
            error: None,
        });
        self.subscribers.remove_task(task_id);
        info!(%task_id, "task cancelled");
        Ok(())
    }

    /// Subscribe to a task's progress updates.
    pub fn on_progress(&self, task_id: &str) -> (SubscriptionToken, mpsc::Receiver<TaskUpdate>) {
        self.subscribers.subscribe(task_id)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) {
        self.subscribers.unsubscribe(token);
    }

    /// Re-enqueue interrupted local work. Running tasks without an external
    /// id are demoted to pending first (re-execution is safe; completed work
    /// was already persisted as terminal).
    pub async fn recover_pending(self: &Arc<Self>) -> Result<usize> {
        let tasks = self.repository.list_pending_or_running().await?;
        let mut recovered = 0;
        for task in tasks {
            if task.is_external() {
                continue;
            }
            if task.status == TaskStatus::Running {
                self.repository
                    .update_status(&task.id, TaskStatus::Pending, task.progress)
                    .await?;
            }
            self.spawn_local_worker(task.id.clone());
            recovered += 1;
        }
        if recovered > 0 {
            info!("recovered {} pending tasks", recovered);
        }
        Ok(recovered)
    }

    /// Resume polling for running tasks owned by upstream jobs.
    pub async fn recover_external(self: &Arc<Self>) -> Result<usize> {
        let tasks = self.repository.list_pending_or_running().await?;
        let mut recovered = 0;
        for task in tasks {
            if task.status == TaskStatus::Running && task.is_external() {
                self.spawn_poll_worker(task.id.clone());
                recovered += 1;
            }
        }
        if recovered > 0 {
            info!("resumed polling for {} external tasks", recovered);
        }
        Ok(recovered)
    }

    /// Stop accepting work in background workers. In-flight executors and
    /// pollers exit at their next checkpoint.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    fn progress_handle(&self, task_id: &str) -> ProgressHandle {
        ProgressHandle {
            repository: self.repository.clone(),
            subscribers: self.subscribers.clone(),
            task_id: task_id.to_string(),
        }
    }

    fn spawn_local_worker(self: &Arc<Self>, task_id: String) {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_local(task_id).await;
        });
    }

    fn spawn_poll_worker(self: &Arc<Self>, task_id: String) {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_poller(task_id).await;
        });
    }

    async fn acquire_permit(&self) -> Option<tokio::sync::OwnedSemaphorePermit> {
        let mut stop = self.stop.subscribe();
        if *stop.borrow() {
            return None;
        }
        tokio::select! {
            permit = self.semaphore.clone().acquire_owned() => permit.ok(),
            _ = stop.changed() => None,
        }
    }

    async fn run_local(self: Arc<Self>, task_id: String) {
        let _permit = match self.acquire_permit().await {
            Some(permit) => permit,
            None => return,
        };

        let task = match self.repository.get(&task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                warn!(%task_id, "task vanished before execution");
                return;
            }
            Err(e) => {
                error!(%task_id, "failed to load task: {}", e);
                return;
            }
        };
        if task.is_terminal() {
            return;
        }

        let executor = self.executors.read().get(&task.task_type).cloned();
        let executor = match executor {
            Some(executor) => executor,
            None => {
                self.fail_task(
                    &task_id,
                    TaskError::execution_failed(format!(
                        "no executor registered for task type {}",
                        task.task_type
                    )),
                )
                .await;
                return;
            }
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancels.insert(task_id.clone(), cancel_tx);
        let cancel = CancelSignal::new(cancel_rx);

        if let Err(e) = self
            .repository
            .update_status(&task_id, TaskStatus::Running, task.progress)
            .await
        {
            error!(%task_id, "failed to mark task running: {}", e);
            self.cancels.remove(&task_id);
            return;
        }
        self.subscribers.notify(TaskUpdate {
            task_id: task_id.clone(),
            status: TaskStatus::Running,
            progress: task.progress,
            output: None,
            error: None,
        });

        let handle = self.progress_handle(&task_id);
        let outcome = executor.execute(&task, &handle, &cancel).await;
        self.cancels.remove(&task_id);

        match outcome {
            Ok(output) => self.complete_task(&task_id, output).await,
            Err(e) => {
                self.fail_task(&task_id, TaskError::execution_failed(e.to_string()))
                    .await
            }
        }
    }

    async fn run_poller(self: Arc<Self>, task_id: String) {
        let _permit = match self.acquire_permit().await {
            Some(permit) => permit,
            None => return,
        };

        let task = match self.repository.get(&task_id).await {
            Ok(Some(task)) => task,
            _ => return,
        };
        let poller = self.pollers.read().get(&task.task_type).cloned();
        let poller = match poller {
            Some(poller) => poller,
            None => {
                self.fail_task(
                    &task_id,
                    TaskError::execution_failed(format!(
                        "no poller registered for task type {}",
                        task.task_type
                    )),
                )
                .await;
                return;
            }
        };

        let mut stop = self.stop.subscribe();
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.changed() => {
                    if *stop.borrow() {
                        debug!(%task_id, "poll worker stopping; task will be recovered");
                        return;
                    }
                    continue;
                }
            }

            // attempts count every tick, including transient-error ticks
            attempts += 1;
            if attempts > self.config.max_poll_attempts {
                self.fail_task(
                    &task_id,
                    TaskError::new("timeout", "exceeded maximum poll attempts"),
                )
                .await;
                return;
            }
            if started.elapsed() >= self.config.poll_timeout {
                self.fail_task(&task_id, TaskError::new("timeout", "task polling timed out"))
                    .await;
                return;
            }

            let task = match self.repository.get(&task_id).await {
                Ok(Some(task)) => task,
                Ok(None) => return,
                Err(e) => {
                    warn!(%task_id, "failed to load task during polling: {}", e);
                    continue;
                }
            };
            if task.is_terminal() {
                return;
            }

            let outcome =
                tokio::time::timeout(self.config.poll_tick_timeout, poller.poll_status(&task))
                    .await;
            let outcome = match outcome {
                Err(_) => {
                    warn!(%task_id, "poll call exceeded its deadline");
                    continue;
                }
                Ok(Err(e)) => {
                    // transient; state is left intact
                    warn!(%task_id, "poll attempt {} failed: {}", attempts, e);
                    continue;
                }
                Ok(Ok(outcome)) => outcome,
            };

            if let Some(message) = outcome.error {
                self.fail_task(&task_id, TaskError::upstream_failed(message))
                    .await;
                return;
            }
            if outcome.completed {
                self.complete_task(&task_id, outcome.output.unwrap_or(Value::Null))
                    .await;
                return;
            }
            if outcome.progress != task.progress {
                if let Err(e) = self
                    .repository
                    .update_status(&task_id, TaskStatus::Running, outcome.progress)
                    .await
                {
                    error!(%task_id, "failed to persist poll progress: {}", e);
                    continue;
                }
                self.subscribers.notify(TaskUpdate {
                    task_id: task_id.clone(),
                    status: TaskStatus::Running,
                    progress: outcome.progress,
                    output: None,
                    error: None,
                });
            }
        }
    }

    async fn complete_task(&self, task_id: &str, output: Value) {
        let mut task = match self.repository.get(task_id).await {
            Ok(Some(task)) => task,
            _ => return,
        };
        if task.is_terminal() {
            // cancelled (or otherwise finished) while work was in flight
            return;
        }

        task.status = TaskStatus::Completed;
        task.progress = 100;
        task.output = Some(output.clone());
        task.error = None;
        task.completed_at = Some(Utc::now());
        task.updated_at = Utc::now();
        if let Err(e) = self.repository.update(&task).await {
            error!(%task_id, "failed to persist completion: {}", e);
            return;
        }

        self.subscribers.notify(TaskUpdate {
            task_id: task_id.to_string(),
            status: TaskStatus::Completed,
            progress: 100,
            output: Some(output),
            error: None,
        });
        self.subscribers.remove_task(task_id);
        debug!(%task_id, "task completed");
    }

    async fn fail_task(&self, task_id: &str, error: TaskError) {
        let mut task = match self.repository.get(task_id).await {
            Ok(Some(task)) => task,
            _ => return,
        };
        if task.is_terminal() {
            return;
        }

        task.status = TaskStatus::Failed;
        task.error = Some(error.clone());
        task.updated_at = Utc::now();
        if let Err(e) = self.repository.update(&task).await {
            error!(%task_id, "failed to persist failure: {}", e);
            return;
        }

        self.subscribers.notify(TaskUpdate {
            task_id: task_id.to_string(),
            status: TaskStatus::Failed,
            progress: task.progress,
            output: None,
            error: Some(error),
        });
        self.subscribers.remove_task(task_id);
        warn!(%task_id, "task failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tasks::PollOutcome;
    use crate::storage::memory::MemoryTaskRepository;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    fn manager_with(config: TaskManagerConfig) -> (Arc<MemoryTaskRepository>, Arc<TaskManager>) {
        let repo = Arc::new(MemoryTaskRepository::default());
        let manager = TaskManager::new(repo.clone(), config);
        (repo, manager)
    }

    fn fast_poll_config() -> TaskManagerConfig {
        TaskManagerConfig {
            poll_interval: Duration::from_millis(10),
            poll_timeout: Duration::from_secs(1),
            max_poll_attempts: 3,
            ..Default::default()
        }
    }

    async fn wait_for_status(
        repo: &Arc<MemoryTaskRepository>,
        task_id: &str,
        status: TaskStatus,
    ) -> Task {
        for _ in 0..300 {
            if let Some(task) = repo.get(task_id).await.unwrap() {
                if task.status == status {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never reached {}", task_id, status);
    }

    struct InstantExecutor;

    #[async_trait]
    impl TaskExecutor for InstantExecutor {
        async fn execute(
            &self,
            _task: &Task,
            progress: &ProgressHandle,
            _cancel: &CancelSignal,
        ) -> Result<Value> {
            progress.report(50).await;
            Ok(json!({"url": "https://cdn.example.com/image.png"}))
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl TaskExecutor for FailingExecutor {
        async fn execute(
            &self,
            _task: &Task,
            _progress: &ProgressHandle,
            _cancel: &CancelSignal,
        ) -> Result<Value> {
            Err(GatewayError::Upstream("model exploded".into()))
        }
    }

    struct WaitForCancelExecutor {
        observed_cancel: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl TaskExecutor for WaitForCancelExecutor {
        async fn execute(
            &self,
            _task: &Task,
            _progress: &ProgressHandle,
            cancel: &CancelSignal,
        ) -> Result<Value> {
            cancel.cancelled().await;
            self.observed_cancel.store(true, Ordering::SeqCst);
            Err(GatewayError::Internal("cancelled".into()))
        }
    }

    struct ConcurrencyProbe {
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TaskExecutor for ConcurrencyProbe {
        async fn execute(
            &self,
            _task: &Task,
            _progress: &ProgressHandle,
            _cancel: &CancelSignal,
        ) -> Result<Value> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(40)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    struct ScriptedPoller {
        script: Mutex<VecDeque<PollOutcome>>,
    }

    impl ScriptedPoller {
        fn new(outcomes: Vec<PollOutcome>) -> Self {
            Self {
                script: Mutex::new(outcomes.into()),
            }
        }
    }

    #[async_trait]
    impl TaskPoller for ScriptedPoller {
        async fn poll_status(&self, _task: &Task) -> Result<PollOutcome> {
            let mut script = self.script.lock().unwrap();
            Ok(script.pop_front().unwrap_or_default())
        }
    }

    struct FlakyThenDonePoller {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TaskPoller for FlakyThenDonePoller {
        async fn poll_status(&self, _task: &Task) -> Result<PollOutcome> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Err(GatewayError::Upstream("transient".into()))
            } else {
                Ok(PollOutcome {
                    progress: 100,
                    completed: true,
                    output: Some(json!({"url": "done"})),
                    error: None,
                })
            }
        }
    }

    #[tokio::test]
    async fn test_local_task_lifecycle() {
        let (repo, manager) = manager_with(TaskManagerConfig::default());
        manager.register_executor(TaskType::ImageGeneration, Arc::new(InstantExecutor));

        let task = manager
            .submit("user-1", TaskType::ImageGeneration, json!({"prompt": "cat"}))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        let done = wait_for_status(&repo, &task.id, TaskStatus::Completed).await;
        assert_eq!(done.progress, 100);
        assert!(done.error.is_none());
        assert!(done.completed_at.is_some());
        assert_eq!(done.output.unwrap()["url"], "https://cdn.example.com/image.png");
    }

    #[tokio::test]
    async fn test_subscribers_see_ordered_updates() {
        let (repo, manager) = manager_with(TaskManagerConfig::default());
        manager.register_executor(TaskType::ImageGeneration, Arc::new(InstantExecutor));

        // subscribe before the worker can run
        let task = Task::new("user-1", TaskType::ImageGeneration, json!({}));
        repo.create(&task).await.unwrap();
        let (_token, mut updates) = manager.on_progress(&task.id);
        manager.spawn_local_worker(task.id.clone());

        let mut seen = Vec::new();
        while let Some(update) = updates.recv().await {
            seen.push((update.status, update.progress));
        }
        assert_eq!(
            seen,
            vec![
                (TaskStatus::Running, 0),
                (TaskStatus::Running, 50),
                (TaskStatus::Completed, 100),
            ]
        );
    }

    #[tokio::test]
    async fn test_executor_error_fails_task() {
        let (repo, manager) = manager_with(TaskManagerConfig::default());
        manager.register_executor(TaskType::ImageGeneration, Arc::new(FailingExecutor));

        let task = manager
            .submit("user-1", TaskType::ImageGeneration, json!({}))
            .await
            .unwrap();
        let failed = wait_for_status(&repo, &task.id, TaskStatus::Failed).await;
        let error = failed.error.unwrap();
        assert_eq!(error.code, "execution_failed");
        assert!(error.message.contains("model exploded"));
    }

    #[tokio::test]
    async fn test_missing_executor_fails_task() {
        let (repo, manager) = manager_with(TaskManagerConfig::default());
        let task = manager
            .submit("user-1", TaskType::AudioGeneration, json!({}))
            .await
            .unwrap();
        let failed = wait_for_status(&repo, &task.id, TaskStatus::Failed).await;
        assert!(failed.error.unwrap().message.contains("no executor registered"));
    }

    #[tokio::test]
    async fn test_cancel_running_task_is_observed() {
        let (repo, manager) = manager_with(TaskManagerConfig::default());
        let observed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        manager.register_executor(
            TaskType::ImageGeneration,
            Arc::new(WaitForCancelExecutor {
                observed_cancel: observed.clone(),
            }),
        );

        let task = manager
            .submit("user-1", TaskType::ImageGeneration, json!({}))
            .await
            .unwrap();
        wait_for_status(&repo, &task.id, TaskStatus::Running).await;

        manager.cancel(&task.id).await.unwrap();
        let cancelled = wait_for_status(&repo, &task.id, TaskStatus::Cancelled).await;
        assert_eq!(cancelled.status, TaskStatus::Cancelled);

        // the executor returning an error after cancellation must not
        // overwrite the terminal state
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(observed.load(Ordering::SeqCst));
        let still = repo.get(&task.id).await.unwrap().unwrap();
        assert_eq!(still.status, TaskStatus::Cancelled);
        assert!(still.error.is_none());
    }

    #[tokio::test]
    async fn test_cancel_terminal_task_is_invalid_state() {
        let (repo, manager) = manager_with(TaskManagerConfig::default());
        manager.register_executor(TaskType::ImageGeneration, Arc::new(InstantExecutor));
        let task = manager
            .submit("user-1", TaskType::ImageGeneration, json!({}))
            .await
            .unwrap();
        wait_for_status(&repo, &task.id, TaskStatus::Completed).await;

        let err = manager.cancel(&task.id).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_cancel_unknown_task_is_not_found() {
        let (_repo, manager) = manager_with(TaskManagerConfig::default());
        assert!(matches!(
            manager.cancel("missing").await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrency_capped_by_admission_gate() {
        let (repo, manager) = manager_with(TaskManagerConfig {
            max_concurrent: 2,
            ..Default::default()
        });
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        manager.register_executor(
            TaskType::ImageGeneration,
            Arc::new(ConcurrencyProbe {
                current: current.clone(),
                peak: peak.clone(),
            }),
        );

        let mut ids = Vec::new();
        for _ in 0..6 {
            ids.push(
                manager
                    .submit("user-1", TaskType::ImageGeneration, json!({}))
                    .await
                    .unwrap()
                    .id,
            );
        }
        for id in &ids {
            wait_for_status(&repo, id, TaskStatus::Completed).await;
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_external_poll_to_completion_sequence() {
        let (repo, manager) = manager_with(fast_poll_config());
        manager.register_poller(
            TaskType::VideoGeneration,
            Arc::new(ScriptedPoller::new(vec![
                PollOutcome {
                    progress: 0,
                    completed: false,
                    output: None,
                    error: None,
                },
                PollOutcome {
                    progress: 50,
                    completed: false,
                    output: None,
                    error: None,
                },
                PollOutcome {
                    progress: 100,
                    completed: true,
                    output: Some(json!({"url": "https://cdn.example.com/video.mp4"})),
                    error: None,
                },
            ])),
        );

        let task = Task::new_external(
            "user-1",
            TaskType::VideoGeneration,
            json!({"prompt": "sunset"}),
            "ext-123",
            "P1",
            "sora-2",
        );
        repo.create(&task).await.unwrap();
        let (_token, mut updates) = manager.on_progress(&task.id);
        manager.spawn_poll_worker(task.id.clone());

        let done = wait_for_status(&repo, &task.id, TaskStatus::Completed).await;
        assert_eq!(done.progress, 100);
        assert_eq!(done.output.unwrap()["url"], "https://cdn.example.com/video.mp4");

        let mut seen = Vec::new();
        while let Some(update) = updates.recv().await {
            seen.push((update.status, update.progress));
        }
        assert_eq!(
            seen,
            vec![(TaskStatus::Running, 50), (TaskStatus::Completed, 100)]
        );
    }

    #[tokio::test]
    async fn test_poll_attempt_cap() {
        let (repo, manager) = manager_with(fast_poll_config());
        manager.register_poller(
            TaskType::VideoGeneration,
            Arc::new(ScriptedPoller::new(Vec::new())),
        );

        let task = Task::new_external(
            "user-1",
            TaskType::VideoGeneration,
            json!({}),
            "ext-stall",
            "P1",
            "sora-2",
        );
        repo.create(&task).await.unwrap();
        manager.spawn_poll_worker(task.id.clone());

        let failed = wait_for_status(&repo, &task.id, TaskStatus::Failed).await;
        assert_eq!(
            failed.error.unwrap().message,
            "exceeded maximum poll attempts"
        );
    }

    #[tokio::test]
    async fn test_poll_wall_clock_timeout() {
        let (repo, manager) = manager_with(TaskManagerConfig {
            poll_interval: Duration::from_millis(10),
            poll_timeout: Duration::from_millis(60),
            max_poll_attempts: 10_000,
            ..Default::default()
        });
        manager.register_poller(
            TaskType::VideoGeneration,
            Arc::new(ScriptedPoller::new(Vec::new())),
        );

        let task = Task::new_external(
            "user-1",
            TaskType::VideoGeneration,
            json!({}),
            "ext-slow",
            "P1",
            "sora-2",
        );
        repo.create(&task).await.unwrap();
        manager.spawn_poll_worker(task.id.clone());

        let failed = wait_for_status(&repo, &task.id, TaskStatus::Failed).await;
        assert_eq!(failed.error.unwrap().message, "task polling timed out");
    }

    #[tokio::test]
    async fn test_transient_poll_errors_do_not_fail_task() {
        let (repo, manager) = manager_with(TaskManagerConfig {
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        });
        manager.register_poller(
            TaskType::VideoGeneration,
            Arc::new(FlakyThenDonePoller {
                calls: AtomicU32::new(0),
            }),
        );

        let task = Task::new_external(
            "user-1",
            TaskType::VideoGeneration,
            json!({}),
            "ext-flaky",
            "P1",
            "sora-2",
        );
        repo.create(&task).await.unwrap();
        manager.spawn_poll_worker(task.id.clone());

        let done = wait_for_status(&repo, &task.id, TaskStatus::Completed).await;
        assert_eq!(done.output.unwrap()["url"], "done");
    }

    #[tokio::test]
    async fn test_upstream_failure_fails_task() {
        let (repo, manager) = manager_with(fast_poll_config());
        manager.register_poller(
            TaskType::VideoGeneration,
            Arc::new(ScriptedPoller::new(vec![PollOutcome {
                progress: 10,
                completed: false,
                output: None,
                error: Some("content policy violation".to_string()),
            }])),
        );

        let task = Task::new_external(
            "user-1",
            TaskType::VideoGeneration,
            json!({}),
            "ext-err",
            "P1",
            "sora-2",
        );
        repo.create(&task).await.unwrap();
        manager.spawn_poll_worker(task.id.clone());

        let failed = wait_for_status(&repo, &task.id, TaskStatus::Failed).await;
        let error = failed.error.unwrap();
        assert_eq!(error.code, "upstream_failed");
        assert_eq!(error.message, "content policy violation");
    }

    #[tokio::test]
    async fn test_recover_pending_demotes_running_tasks() {
        let repo = Arc::new(MemoryTaskRepository::default());

        let mut interrupted = Task::new("user-1", TaskType::ImageGeneration, json!({}));
        interrupted.status = TaskStatus::Running;
        interrupted.progress = 40;
        repo.create(&interrupted).await.unwrap();

        let mut external = Task::new_external(
            "user-1",
            TaskType::VideoGeneration,
            json!({}),
            "ext-keep",
            "P1",
            "sora-2",
        );
        external.status = TaskStatus::Running;
        repo.create(&external).await.unwrap();

        // no executor registered: workers cannot reach the running state,
        // so the post-recovery snapshot is deterministic
        let manager = TaskManager::new(repo.clone(), TaskManagerConfig::default());
        let recovered = manager.recover_pending().await.unwrap();
        assert_eq!(recovered, 1);

        for task in repo.list_pending_or_running().await.unwrap() {
            if !task.is_external() {
                assert_ne!(task.status, TaskStatus::Running);
            }
        }
        // the external running task is left for recover_external
        let external = repo.get(&external.id).await.unwrap().unwrap();
        assert_eq!(external.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_recover_pending_reruns_to_completion() {
        let repo = Arc::new(MemoryTaskRepository::default());

        let mut interrupted = Task::new("user-1", TaskType::ImageGeneration, json!({}));
        interrupted.status = TaskStatus::Running;
        interrupted.progress = 40;
        repo.create(&interrupted).await.unwrap();

        let queued = Task::new("user-1", TaskType::ImageGeneration, json!({}));
        repo.create(&queued).await.unwrap();

        let manager = TaskManager::new(repo.clone(), TaskManagerConfig::default());
        manager.register_executor(TaskType::ImageGeneration, Arc::new(InstantExecutor));
        let recovered = manager.recover_pending().await.unwrap();
        assert_eq!(recovered, 2);

        wait_for_status(&repo, &interrupted.id, TaskStatus::Completed).await;
        wait_for_status(&repo, &queued.id, TaskStatus::Completed).await;
    }

    #[tokio::test]
    async fn test_recover_external_resumes_polling() {
        let repo = Arc::new(MemoryTaskRepository::default());
        let task = Task::new_external(
            "user-1",
            TaskType::VideoGeneration,
            json!({}),
            "ext-resume",
            "P1",
            "sora-2",
        );
        repo.create(&task).await.unwrap();

        let manager = TaskManager::new(repo.clone(), fast_poll_config());
        manager.register_poller(
            TaskType::VideoGeneration,
            Arc::new(ScriptedPoller::new(vec![PollOutcome {
                progress: 100,
                completed: true,
                output: Some(json!({"url": "recovered"})),
                error: None,
            }])),
        );
        let resumed = manager.recover_external().await.unwrap();
        assert_eq!(resumed, 1);

        let done = wait_for_status(&repo, &task.id, TaskStatus::Completed).await;
        assert_eq!(done.output.unwrap()["url"], "recovered");
    }

    #[tokio::test]
    async fn test_terminal_task_fields_are_immutable() {
        let (repo, manager) = manager_with(TaskManagerConfig::default());
        manager.register_executor(TaskType::ImageGeneration, Arc::new(InstantExecutor));
        let task = manager
            .submit("user-1", TaskType::ImageGeneration, json!({"prompt": "cat"}))
            .await
            .unwrap();
        let done = wait_for_status(&repo, &task.id, TaskStatus::Completed).await;

        // late completion/failure attempts are ignored
        manager.complete_task(&task.id, json!({"url": "other"})).await;
        manager
            .fail_task(&task.id, TaskError::execution_failed("late"))
            .await;

        let unchanged = repo.get(&task.id).await.unwrap().unwrap();
        assert_eq!(unchanged.owner_id, done.owner_id);
        assert_eq!(unchanged.input, done.input);
        assert_eq!(unchanged.output, done.output);
        assert_eq!(unchanged.status, TaskStatus::Completed);
    }
}
