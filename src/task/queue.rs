use crate::env::operations::{TASK_AFTER, TASK_BEFORE};
use crate::health::HealthMonitor;
use crate::hooks::{HookChainResult, HookContext, HookPipeline};
use crate::recovery::journal::{ErrorJournal, ErrorSource};
use crate::resources::{ResourceId, ResourceTracker};
use crate::task::backoff::BackoffPolicy;
use crate::task::types::*;
use chrono::Utc;
use futures::FutureExt;
use futures::future::join_all;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;

#[derive(Default)]
struct QueueState {
    /// Pending and processing tasks; bounded by `max_queue_size`
    active: HashMap<TaskId, Task>,
    /// Pending tasks eligible for the next batch, in arrival order
    ready: VecDeque<TaskId>,
    completed: HashMap<TaskId, Task>,
    dead_letter: VecDeque<Task>,
    /// Backoff timers of pending tasks waiting to re-enter `ready`
    retry_timers: HashMap<TaskId, ResourceId>,
}

struct QueueInner {
    config: QueueConfig,
    backoff: BackoffPolicy,
    state: RwLock<QueueState>,
    run_state: AtomicU8,
    paused: AtomicBool,
    handler: Arc<dyn TaskHandler>,
    hooks: Option<Arc<HookPipeline>>,
    resources: ResourceTracker,
    health: Arc<HealthMonitor>,
    journal: Arc<ErrorJournal>,
    recovery: std::sync::RwLock<Option<Arc<dyn RecoveryTrigger>>>,
}

/// Retrying, backing-off task queue with bounded batches and a dead-letter set.
///
/// Cloning is cheap and every clone drives the same queue. At most one
/// processing loop runs at a time; it is started on demand by `enqueue`,
/// `resume` and retry timers.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

/// Non-owning handle, used by components the queue itself points at
#[derive(Clone)]
pub struct WeakTaskQueue {
    inner: Weak<QueueInner>,
}

impl WeakTaskQueue {
    pub fn upgrade(&self) -> Option<TaskQueue> {
        self.inner.upgrade().map(|inner| TaskQueue { inner })
    }
}

pub struct TaskQueueBuilder {
    config: QueueConfig,
    handler: Arc<dyn TaskHandler>,
    hooks: Option<Arc<HookPipeline>>,
    resources: Option<ResourceTracker>,
    health: Option<Arc<HealthMonitor>>,
    journal: Option<Arc<ErrorJournal>>,
}

impl TaskQueueBuilder {
    /// Wrap every task with the `task.before` / `task.after` hooks
    pub fn with_hooks(mut self, hooks: Arc<HookPipeline>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_resources(mut self, resources: ResourceTracker) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn with_health(mut self, health: Arc<HealthMonitor>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_journal(mut self, journal: Arc<ErrorJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn build(self) -> Result<TaskQueue, QueueError> {
        self.config.validate()?;

        Ok(TaskQueue {
            inner: Arc::new(QueueInner {
                backoff: BackoffPolicy::from_config(&self.config),
                config: self.config,
                state: RwLock::new(QueueState::default()),
                run_state: AtomicU8::new(IDLE),
                paused: AtomicBool::new(false),
                handler: self.handler,
                hooks: self.hooks,
                resources: self.resources.unwrap_or_default(),
                health: self.health.unwrap_or_default(),
                journal: self.journal.unwrap_or_default(),
                recovery: std::sync::RwLock::new(None),
            }),
        })
    }
}

impl TaskQueue {
    pub fn builder(config: QueueConfig, handler: Arc<dyn TaskHandler>) -> TaskQueueBuilder {
        TaskQueueBuilder {
            config,
            handler,
            hooks: None,
            resources: None,
            health: None,
            journal: None,
        }
    }

    pub fn new(config: QueueConfig, handler: Arc<dyn TaskHandler>) -> Result<Self, QueueError> {
        Self::builder(config, handler).build()
    }

    pub fn downgrade(&self) -> WeakTaskQueue {
        WeakTaskQueue {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.inner.health
    }

    pub fn journal(&self) -> &Arc<ErrorJournal> {
        &self.inner.journal
    }

    pub fn resources(&self) -> &ResourceTracker {
        &self.inner.resources
    }

    /// Attach the component asked to remediate when the queue degrades
    pub fn set_recovery_trigger(&self, trigger: Arc<dyn RecoveryTrigger>) {
        let mut slot = self
            .inner
            .recovery
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(trigger);
    }

    fn recovery_trigger(&self) -> Option<Arc<dyn RecoveryTrigger>> {
        self.inner
            .recovery
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Admit a payload as a pending task and make sure the loop is running
    pub async fn enqueue(&self, payload: serde_json::Value) -> Result<TaskId, QueueError> {
        let task = Task::new(payload);
        let task_id = task.id;

        {
            let mut state = self.inner.state.write().await;
            let capacity = self.inner.config.max_queue_size;
            if state.active.len() >= capacity {
                debug!("Rejecting task, queue at capacity {}", capacity);
                return Err(QueueError::QueueFull { capacity });
            }
            state.active.insert(task_id, task);
            state.ready.push_back(task_id);
        }

        debug!("Enqueued task {}", task_id);
        self.start_processing();
        Ok(task_id)
    }

    /// Start the processing loop unless it is already running or the queue
    /// is paused
    pub fn start_processing(&self) {
        if self.is_paused() {
            return;
        }
        if self
            .inner
            .run_state
            .compare_exchange(IDLE, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        debug!("Starting queue processing loop");
        tokio::spawn(self.clone().run());
    }

    pub fn is_processing(&self) -> bool {
        self.inner.run_state.load(Ordering::SeqCst) == RUNNING
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Stop pulling new batches; the batch in flight still settles
    pub fn pause(&self) {
        if !self.inner.paused.swap(true, Ordering::SeqCst) {
            info!("Task queue paused");
        }
    }

    pub fn resume(&self) {
        if self.inner.paused.swap(false, Ordering::SeqCst) {
            info!("Task queue resumed");
        }
        self.start_processing();
    }

    async fn run(self) {
        let batch_timeout = self.inner.config.batch_processing_timeout();

        loop {
            match tokio::time::timeout(batch_timeout, self.drain()).await {
                Err(_) => {
                    let reset = self.reset_processing().await;
                    self.inner.run_state.store(IDLE, Ordering::SeqCst);
                    self.report_batch_timeout(batch_timeout, reset).await;
                    // The reset tasks must not wait for an unrelated enqueue.
                    if self.has_ready().await {
                        self.start_processing();
                    }
                    return;
                }
                Ok(Some(reason)) => {
                    // Remediation is not bounded by the batch timeout.
                    if let Some(trigger) = self.recovery_trigger() {
                        trigger.request_recovery(reason).await;
                    }
                    continue;
                }
                Ok(None) => {}
            }

            self.inner.run_state.store(IDLE, Ordering::SeqCst);

            // Work may have arrived between the last batch and going idle.
            if self.is_paused() || !self.has_ready().await {
                return;
            }
            if self
                .inner
                .run_state
                .compare_exchange(IDLE, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }
        }
    }

    /// Run batches until the queue is empty or paused. Stops early with the
    /// reason when a batch leaves the queue unhealthy.
    async fn drain(&self) -> Option<DegradationReason> {
        let pause = self.inner.config.inter_batch_pause();

        while !self.is_paused() {
            let batch = self.next_batch().await;
            if batch.is_empty() {
                break;
            }

            debug!("Processing batch of {} tasks", batch.len());
            join_all(batch.into_iter().map(|task| self.process_task(task))).await;

            let degraded = self.check_health().await;
            tokio::time::sleep(pause).await;
            if degraded.is_some() {
                return degraded;
            }
        }
        None
    }

    async fn has_ready(&self) -> bool {
        !self.inner.state.read().await.ready.is_empty()
    }

    /// Move up to `batch_size` ready tasks to processing
    async fn next_batch(&self) -> Vec<Task> {
        let mut state = self.inner.state.write().await;
        let mut batch = Vec::new();

        while batch.len() < self.inner.config.batch_size {
            let Some(task_id) = state.ready.pop_front() else {
                break;
            };
            if let Some(task) = state.active.get_mut(&task_id) {
                if task.status == TaskStatus::Pending {
                    task.update_status(TaskStatus::Processing);
                    batch.push(task.clone());
                }
            }
        }

        batch
    }

    async fn process_task(&self, task: Task) {
        let started = Instant::now();
        let outcome = self.execute(&task).await;
        self.inner.health.update_score(outcome.is_ok(), started.elapsed());
        self.settle(task.id, outcome).await;
    }

    /// Pre hooks, then the handler raced against the per-task timeout, then
    /// post hooks
    async fn execute(&self, task: &Task) -> Result<serde_json::Value, QueueError> {
        let mut payload = task.payload.clone();

        if let Some(hooks) = &self.inner.hooks {
            let mut context = HookContext::new(TASK_BEFORE, payload)
                .with_metadata("task_id", task.id.to_string())
                .with_metadata("attempt", task.attempt_count);
            let chain = hooks.execute_hooks(TASK_BEFORE, &mut context).await;
            self.check_hook_chain(task.id, TASK_BEFORE, &chain)?;
            payload = context.content;
        }

        let timeout = self.inner.config.per_task_timeout();
        let handler = self.inner.handler.clone();
        let run = AssertUnwindSafe(async move { handler.execute(payload).await }).catch_unwind();
        let tracked = self
            .inner
            .resources
            .track_operation(format!("task:{}", task.id), run);

        let output = match tokio::time::timeout(timeout, tracked).await {
            Err(_) => {
                return Err(QueueError::TaskTimeout {
                    task_id: task.id,
                    timeout,
                });
            }
            Ok(Err(_)) => {
                return Err(QueueError::TaskHandler {
                    task_id: task.id,
                    message: "handler panicked".to_string(),
                });
            }
            Ok(Ok(Err(error))) => {
                return Err(QueueError::TaskHandler {
                    task_id: task.id,
                    message: format!("{:#}", error),
                });
            }
            Ok(Ok(Ok(output))) => output,
        };

        if let Some(hooks) = &self.inner.hooks {
            let mut context = HookContext::new(TASK_AFTER, output.clone())
                .with_metadata("task_id", task.id.to_string())
                .with_metadata("attempt", task.attempt_count);
            let chain = hooks.execute_hooks(TASK_AFTER, &mut context).await;
            self.check_hook_chain(task.id, TASK_AFTER, &chain)?;
        }

        Ok(output)
    }

    fn check_hook_chain(
        &self,
        task_id: TaskId,
        operation: &str,
        chain: &HookChainResult,
    ) -> Result<(), QueueError> {
        for failure in chain.failures() {
            if let Some(error) = &failure.error {
                self.inner.journal.record(ErrorSource::Hook, error.to_string());
            }
        }

        if chain.success {
            return Ok(());
        }
        Err(QueueError::HookRejected {
            task_id,
            operation: operation.to_string(),
            message: chain
                .blocking_error()
                .map(|error| error.to_string())
                .unwrap_or_else(|| "blocking hook failed".to_string()),
        })
    }

    /// Record the outcome of one attempt: complete, schedule a retry, or
    /// dead-letter
    async fn settle(&self, task_id: TaskId, outcome: Result<serde_json::Value, QueueError>) {
        let mut state = self.inner.state.write().await;
        let Some(mut task) = state.active.remove(&task_id) else {
            debug!("Task {} left the active set before settling", task_id);
            return;
        };

        match outcome {
            Ok(output) => {
                task.output = Some(output);
                task.last_error = None;
                task.next_retry_delay = None;
                task.completed_at = Some(Utc::now());
                task.update_status(TaskStatus::Completed);
                debug!("Completed task {} after {} failed attempts", task_id, task.attempt_count);
                state.completed.insert(task_id, task);
            }
            Err(failure) => {
                let message = failure.to_string();
                self.inner.journal.record(ErrorSource::Task, message.clone());
                task.attempt_count += 1;
                task.last_error = Some(message);

                if task.attempt_count < self.inner.config.max_retries {
                    let delay = self.inner.backoff.delay_for(task.attempt_count);
                    warn!(
                        "Task {} failed (attempt {}), retrying in {:?}: {}",
                        task_id, task.attempt_count, delay, failure
                    );
                    task.next_retry_delay = Some(delay);
                    task.update_status(TaskStatus::Pending);
                    state.active.insert(task_id, task);

                    let timer = self.schedule_retry(task_id, delay);
                    state.retry_timers.insert(task_id, timer);
                } else {
                    error!(
                        "Task {} dead-lettered after {} attempts: {}",
                        task_id, task.attempt_count, failure
                    );
                    task.next_retry_delay = None;
                    task.update_status(TaskStatus::Failed);
                    state.dead_letter.push_back(task);

                    while state.dead_letter.len() > self.inner.config.max_dead_letters {
                        if let Some(evicted) = state.dead_letter.pop_front() {
                            warn!("Dead-letter set full, evicting task {}", evicted.id);
                        }
                    }
                }
            }
        }
    }

    fn schedule_retry(&self, task_id: TaskId, delay: Duration) -> ResourceId {
        let queue = self.downgrade();
        self.inner
            .resources
            .schedule_once(format!("retry:{}", task_id), delay, async move {
                if let Some(queue) = queue.upgrade() {
                    queue.requeue(task_id).await;
                }
            })
    }

    async fn requeue(&self, task_id: TaskId) {
        {
            let mut state = self.inner.state.write().await;
            // Whoever removes the timer entry owns the re-entry.
            if state.retry_timers.remove(&task_id).is_none() {
                return;
            }
            match state.active.get_mut(&task_id) {
                Some(task) if task.status == TaskStatus::Pending => {
                    task.next_retry_delay = None;
                    state.ready.push_back(task_id);
                }
                _ => return,
            }
        }

        debug!("Task {} re-entered the queue", task_id);
        self.start_processing();
    }

    async fn reset_processing(&self) -> usize {
        let mut state = self.inner.state.write().await;
        let mut reset = Vec::new();

        for task in state.active.values_mut() {
            if task.status == TaskStatus::Processing {
                task.update_status(TaskStatus::Pending);
                reset.push(task.id);
            }
        }
        state.ready.extend(reset.iter().copied());
        reset.len()
    }

    async fn report_batch_timeout(&self, timeout: Duration, reset: usize) {
        let failure = QueueError::BatchTimeout { timeout };
        error!("{}; {} tasks reset to pending", failure, reset);
        self.inner
            .journal
            .record(ErrorSource::Batch, failure.to_string());

        if let Some(trigger) = self.recovery_trigger() {
            trigger
                .request_recovery(DegradationReason::BatchTimeout { timeout })
                .await;
        }
    }

    /// Post-batch health gate; an unhealthy queue compacts itself and hands
    /// back the reason to remediate before the next batch
    async fn check_health(&self) -> Option<DegradationReason> {
        let stats = self.stats().await;
        let issues = self.inner.health.assess(&stats);
        if issues.is_empty() {
            return None;
        }

        let issues: Vec<String> = issues.iter().map(|issue| issue.to_string()).collect();
        warn!("Queue unhealthy: {}", issues.join(", "));
        self.compact().await;

        let score = self.inner.health.score();
        Some(DegradationReason::Unhealthy { score, issues })
    }

    /// Drop completed tasks older than the configured retention window
    pub async fn compact(&self) -> usize {
        self.compact_older_than(self.inner.config.completed_retention())
            .await
    }

    pub async fn compact_older_than(&self, retention: Duration) -> usize {
        let now = Utc::now();
        let mut state = self.inner.state.write().await;
        let before = state.completed.len();

        state.completed.retain(|_, task| {
            let age = task
                .completed_at
                .and_then(|completed_at| (now - completed_at).to_std().ok());
            !matches!(age, Some(age) if age >= retention)
        });

        let removed = before - state.completed.len();
        if removed > 0 {
            info!("Compacted {} completed tasks", removed);
        }
        removed
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.inner.state.read().await;
        let mut stats = QueueStats {
            active: state.active.len(),
            completed: state.completed.len(),
            dead_lettered: state.dead_letter.len(),
            ..Default::default()
        };

        for task in state.active.values() {
            match task.status {
                TaskStatus::Pending => {
                    stats.pending += 1;
                    if task.last_error.is_some() {
                        stats.retrying += 1;
                    }
                }
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed | TaskStatus::Failed => {}
            }
        }

        stats.total = stats.active + stats.completed + stats.dead_lettered;
        stats.failed = stats.retrying + stats.dead_lettered;
        stats
    }

    /// Look a task up across the active, completed and dead-letter sets
    pub async fn get_task(&self, task_id: TaskId) -> Option<Task> {
        let state = self.inner.state.read().await;
        state
            .active
            .get(&task_id)
            .or_else(|| state.completed.get(&task_id))
            .or_else(|| state.dead_letter.iter().find(|task| task.id == task_id))
            .cloned()
    }

    pub async fn dead_letters(&self) -> Vec<Task> {
        self.inner.state.read().await.dead_letter.iter().cloned().collect()
    }

    pub async fn clear_dead_letter(&self) -> usize {
        let mut state = self.inner.state.write().await;
        let cleared = state.dead_letter.len();
        state.dead_letter.clear();
        if cleared > 0 {
            info!("Cleared {} dead-lettered tasks", cleared);
        }
        cleared
    }

    /// Move every dead-lettered task back to pending with a fresh retry
    /// budget and resume processing. Retried tasks bypass admission control.
    pub async fn retry_dead_letter(&self) -> usize {
        let retried = {
            let mut state = self.inner.state.write().await;
            let tasks: Vec<Task> = state.dead_letter.drain(..).collect();
            let retried = tasks.len();

            for mut task in tasks {
                task.attempt_count = 0;
                task.last_error = None;
                task.next_retry_delay = None;
                task.update_status(TaskStatus::Pending);
                state.ready.push_back(task.id);
                state.active.insert(task.id, task);
            }
            retried
        };

        if retried > 0 {
            info!("Retrying {} dead-lettered tasks", retried);
        }
        self.resume();
        retried
    }

    /// Re-admit pending tasks whose retry timer was cancelled from outside
    /// (for example by a resource cleanup), and processing tasks orphaned
    /// while no loop is running.
    pub async fn recover_stranded(&self) -> usize {
        let idle = !self.is_processing();
        let recovered = {
            let mut state = self.inner.state.write().await;
            let queued: HashSet<TaskId> = state.ready.iter().copied().collect();
            let resources = &self.inner.resources;

            let stranded: Vec<TaskId> = state
                .active
                .values()
                .filter(|task| !queued.contains(&task.id))
                .filter(|task| match task.status {
                    TaskStatus::Pending => !state
                        .retry_timers
                        .get(&task.id)
                        .is_some_and(|timer| resources.is_tracked(*timer)),
                    TaskStatus::Processing => idle,
                    _ => false,
                })
                .map(|task| task.id)
                .collect();

            for task_id in &stranded {
                state.retry_timers.remove(task_id);
                if let Some(task) = state.active.get_mut(task_id) {
                    task.next_retry_delay = None;
                    task.update_status(TaskStatus::Pending);
                }
                state.ready.push_back(*task_id);
            }
            stranded.len()
        };

        if recovered > 0 {
            info!("Recovered {} stranded tasks", recovered);
            self.start_processing();
        }
        recovered
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("config", &self.inner.config)
            .field("processing", &self.is_processing())
            .field("paused", &self.is_paused())
            .finish()
    }
}
