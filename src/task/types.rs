use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for tasks
pub type TaskId = Uuid;

/// Lifecycle of a queued task
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Waiting to be pulled into a batch (including while a retry is scheduled)
    Pending,
    /// Part of the batch currently executing
    Processing,
    /// Handler succeeded; retained until compaction
    Completed,
    /// Retry budget exhausted; lives in the dead-letter set
    Failed,
}

/// A unit of work owned by the queue
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Task {
    pub id: TaskId,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub status: TaskStatus,
    pub last_error: Option<String>,
    /// Delay of the retry currently scheduled for this task, if any
    pub next_retry_delay: Option<Duration>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output: Option<serde_json::Value>,
}

impl Task {
    pub fn new(payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            payload,
            enqueued_at: now,
            updated_at: now,
            attempt_count: 0,
            status: TaskStatus::Pending,
            last_error: None,
            next_retry_delay: None,
            completed_at: None,
            output: None,
        }
    }

    pub fn update_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// A pending task waiting out its backoff delay
    pub fn is_awaiting_retry(&self) -> bool {
        self.status == TaskStatus::Pending && self.next_retry_delay.is_some()
    }
}

/// Caller-supplied executor for task payloads
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute one payload. Returning an error marks the attempt as failed.
    async fn execute(&self, payload: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

/// Queue configuration; immutable once the queue is constructed
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    pub max_queue_size: usize,
    pub max_retries: u32,
    pub per_task_timeout_ms: u64,
    pub batch_processing_timeout_ms: u64,
    pub batch_size: usize,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_delay_ms: u64,
    pub inter_batch_pause_ms: u64,
    pub completed_retention_secs: u64,
    pub max_dead_letters: usize,
}

impl QueueConfig {
    pub fn per_task_timeout(&self) -> Duration {
        Duration::from_millis(self.per_task_timeout_ms)
    }

    pub fn batch_processing_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_processing_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn max_backoff_delay(&self) -> Duration {
        Duration::from_millis(self.max_backoff_delay_ms)
    }

    pub fn inter_batch_pause(&self) -> Duration {
        Duration::from_millis(self.inter_batch_pause_ms)
    }

    pub fn completed_retention(&self) -> Duration {
        Duration::from_secs(self.completed_retention_secs)
    }

    /// Check invariants the queue relies on
    pub fn validate(&self) -> Result<(), QueueError> {
        let invalid = |reason: &str| Err(QueueError::InvalidConfig(reason.to_string()));

        if self.max_queue_size == 0 {
            return invalid("max_queue_size must be greater than zero");
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be greater than zero");
        }
        if self.per_task_timeout_ms == 0 {
            return invalid("per_task_timeout_ms must be greater than zero");
        }
        if self.batch_processing_timeout_ms == 0 {
            return invalid("batch_processing_timeout_ms must be greater than zero");
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return invalid("backoff_multiplier must be a finite number >= 1.0");
        }
        if self.max_backoff_delay_ms < self.backoff_base_ms {
            return invalid("max_backoff_delay_ms must be >= backoff_base_ms");
        }
        if self.max_dead_letters == 0 {
            return invalid("max_dead_letters must be greater than zero");
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            max_retries: 3,
            per_task_timeout_ms: 30_000,
            batch_processing_timeout_ms: 300_000,
            batch_size: 10,
            backoff_base_ms: 1_000,
            backoff_multiplier: 2.0,
            max_backoff_delay_ms: 30_000,
            inter_batch_pause_ms: 10,
            completed_retention_secs: 3_600,
            max_dead_letters: 1_000,
        }
    }
}

/// Point-in-time task counts
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Active, retained-completed and dead-lettered tasks
    pub total: usize,
    /// Tasks counted against `max_queue_size` (pending and processing)
    pub active: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    /// Pending tasks whose last attempt failed
    pub retrying: usize,
    /// Tasks currently in a failure state: retrying plus dead-lettered
    pub failed: usize,
    pub dead_lettered: usize,
}

impl QueueStats {
    pub fn failure_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failed as f64 / self.total as f64
        }
    }
}

/// Queue error taxonomy
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    #[error("Queue is full ({capacity} tasks)")]
    QueueFull { capacity: usize },

    #[error("Task {task_id} timed out after {timeout:?}")]
    TaskTimeout { task_id: TaskId, timeout: Duration },

    #[error("Task {task_id} handler failed: {message}")]
    TaskHandler { task_id: TaskId, message: String },

    #[error("Batch run exceeded {timeout:?}")]
    BatchTimeout { timeout: Duration },

    #[error("Task {task_id} rejected by hook on {operation}: {message}")]
    HookRejected {
        task_id: TaskId,
        operation: String,
        message: String,
    },

    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),
}

/// Why the queue asks for outside remediation
#[derive(Debug, Clone, PartialEq)]
pub enum DegradationReason {
    /// A post-batch health check failed
    Unhealthy { score: u8, issues: Vec<String> },
    /// A processing run exceeded the batch timeout
    BatchTimeout { timeout: Duration },
}

/// Remediation entry point the queue calls when it degrades
#[async_trait]
pub trait RecoveryTrigger: Send + Sync {
    async fn request_recovery(&self, reason: DegradationReason);
}
