//! # Engine Composition
//!
//! Wires the reliability layer into one owner with a single configuration
//! file.
//!
//! ## Core Components
//!
//! - **[`Engine`]**: owns the queue, hook pipeline, session persistence and
//!   recovery controller, all sharing one resource tracker, error journal and
//!   health monitor
//! - **[`EngineConfig`]**: TOML-backed configuration for every subsystem
//! - **[`EngineStatus`]**: point-in-time view across the subsystems
//!
//! ## Wiring
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                        Engine                        │
//! │  ┌────────────┐  trigger   ┌──────────────────────┐  │
//! │  │ TaskQueue  │ ─────────▶ │ RecoveryController   │  │
//! │  └────────────┘            └──────────────────────┘  │
//! │        │ hooks                        │ snapshots    │
//! │  ┌────────────┐            ┌──────────────────────┐  │
//! │  │HookPipeline│ ◀───────── │ SessionPersistence   │  │
//! │  └────────────┘            └──────────────────────┘  │
//! │   ResourceTracker · ErrorJournal · HealthMonitor     │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use bulwark::{Engine, EngineConfig, NoopHost, TaskHandler};
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl TaskHandler for Echo {
//!     async fn execute(&self, payload: serde_json::Value) -> anyhow::Result<serde_json::Value> {
//!         Ok(payload)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Engine::new(EngineConfig::default(), Arc::new(Echo), Arc::new(NoopHost)).await?;
//!     engine.start_monitoring();
//!     engine.enqueue(serde_json::json!({"job": 1})).await?;
//!
//!     let status = engine.status().await;
//!     println!("healthy: {}", status.is_healthy);
//!
//!     engine.shutdown().await?;
//!     Ok(())
//! }
//! ```

use crate::env;
use crate::health::{HealthConfig, HealthMonitor, HealthSnapshot};
use crate::hooks::{Hook, HookChainResult, HookContext, HookPipeline};
use crate::recovery::{
    ErrorJournal, RecoveryConfig, RecoveryController, RecoveryHost, RecoveryStatus,
};
use crate::resources::{ResourceCounts, ResourceTracker};
use crate::session::{
    FileStore, KeyValueStore, MemoryStore, PersistenceConfig, SessionPersistence, SessionState,
};
use crate::task::{QueueConfig, QueueError, QueueStats, Task, TaskHandler, TaskId, TaskQueue};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Hook registration defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// Operations a hook joins when registered without one
    pub default_operations: Vec<String>,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            default_operations: env::operations::DEFAULT_OPERATIONS
                .iter()
                .map(|op| op.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub queue: QueueConfig,
    pub health: HealthConfig,
    pub recovery: RecoveryConfig,
    pub hooks: HookConfig,
    pub persistence: PersistenceConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }

    /// Save configuration to a TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml_string()?;
        std::fs::write(path, content).context("Failed to write config file")
    }

    /// Convert configuration to a TOML string
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }

    pub fn validate(&self) -> Result<()> {
        self.queue.validate()?;
        self.recovery.validate()?;
        if self.persistence.snapshot_key.is_empty() {
            anyhow::bail!("persistence.snapshot_key must not be empty");
        }
        if !(0.0..=1.0).contains(&self.health.max_failure_ratio) {
            anyhow::bail!("health.max_failure_ratio must be between 0 and 1");
        }
        Ok(())
    }
}

/// Snapshot of every subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub session_id: String,
    pub queue: QueueStats,
    pub health: HealthSnapshot,
    pub recovery: RecoveryStatus,
    pub resources: ResourceCounts,
    pub is_healthy: bool,
}

/// Owner of one reliability stack
pub struct Engine {
    config: EngineConfig,
    session_id: String,
    queue: TaskQueue,
    hooks: Arc<HookPipeline>,
    persistence: Arc<SessionPersistence>,
    controller: RecoveryController,
    host: Arc<dyn RecoveryHost>,
}

impl Engine {
    pub async fn new(
        config: EngineConfig,
        handler: Arc<dyn TaskHandler>,
        host: Arc<dyn RecoveryHost>,
    ) -> Result<Self> {
        Self::with_session_id(config, handler, host, Uuid::new_v4().to_string()).await
    }

    /// Build an engine whose snapshots belong to `session_id`
    pub async fn with_session_id(
        config: EngineConfig,
        handler: Arc<dyn TaskHandler>,
        host: Arc<dyn RecoveryHost>,
        session_id: impl Into<String>,
    ) -> Result<Self> {
        config.validate()?;
        let session_id = session_id.into();

        let resources = ResourceTracker::new();
        let journal = Arc::new(ErrorJournal::new(config.recovery.journal_capacity));
        let health = Arc::new(HealthMonitor::new(config.health.clone()));
        let hooks = Arc::new(
            HookPipeline::new(resources.clone())
                .with_default_operations(config.hooks.default_operations.clone()),
        );

        let queue = TaskQueue::builder(config.queue.clone(), handler)
            .with_hooks(hooks.clone())
            .with_resources(resources)
            .with_health(health)
            .with_journal(journal)
            .build()?;

        let store: Arc<dyn KeyValueStore> = match &config.persistence.store_dir {
            Some(dir) => Arc::new(
                FileStore::open(dir.clone())
                    .await
                    .with_context(|| format!("Failed to open session store at {:?}", dir))?,
            ),
            None => Arc::new(MemoryStore::new()),
        };
        let persistence = Arc::new(
            SessionPersistence::new(session_id.clone(), store)
                .with_snapshot_key(config.persistence.snapshot_key.clone())
                .with_hooks(hooks.clone()),
        );

        let controller = RecoveryController::new(
            config.recovery.clone(),
            &queue,
            persistence.clone(),
            host.clone(),
        );

        info!("Engine initialized for session {}", session_id);
        Ok(Self {
            config,
            session_id,
            queue,
            hooks,
            persistence,
            controller,
            host,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn hooks(&self) -> &Arc<HookPipeline> {
        &self.hooks
    }

    pub fn persistence(&self) -> &Arc<SessionPersistence> {
        &self.persistence
    }

    pub fn controller(&self) -> &RecoveryController {
        &self.controller
    }

    pub async fn enqueue(&self, payload: serde_json::Value) -> Result<TaskId, QueueError> {
        self.queue.enqueue(payload).await
    }

    pub fn pause(&self) {
        self.queue.pause();
    }

    pub fn resume(&self) {
        self.queue.resume();
    }

    pub async fn stats(&self) -> QueueStats {
        self.queue.stats().await
    }

    pub async fn get_task(&self, task_id: TaskId) -> Option<Task> {
        self.queue.get_task(task_id).await
    }

    pub async fn dead_letters(&self) -> Vec<Task> {
        self.queue.dead_letters().await
    }

    pub async fn retry_dead_letter(&self) -> usize {
        self.queue.retry_dead_letter().await
    }

    pub async fn register_hook(&self, hook: Hook, operation: Option<&str>) {
        self.hooks.register_hook(hook, operation).await;
    }

    pub async fn execute_hooks(&self, operation: &str, context: &mut HookContext) -> HookChainResult {
        self.hooks.execute_hooks(operation, context).await
    }

    pub async fn save_state(&self, state: &SessionState) -> bool {
        self.persistence.save_state(state).await
    }

    pub async fn restore_state(&self) -> Option<SessionState> {
        self.persistence.restore_state().await
    }

    pub fn start_monitoring(&self) -> bool {
        self.controller.start_monitoring()
    }

    pub fn stop_monitoring(&self) -> bool {
        self.controller.stop_monitoring()
    }

    pub async fn status(&self) -> EngineStatus {
        let queue = self.queue.stats().await;
        let is_healthy = self.queue.health().is_healthy(&queue) && !self.controller.is_irrecoverable();

        EngineStatus {
            session_id: self.session_id.clone(),
            queue,
            health: self.queue.health().snapshot(),
            recovery: self.controller.status(),
            resources: self.queue.resources().counts(),
            is_healthy,
        }
    }

    /// Stop sampling and intake, persist host state, then release every
    /// tracked resource
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down engine for session {}", self.session_id);
        self.controller.stop_monitoring();
        self.queue.pause();

        let state = self.host.capture_state().await;
        if !self.persistence.save_state(&state).await {
            warn!("Session state was not saved during shutdown");
        }

        let report = self.queue.resources().cleanup_leaked_resources();
        info!("Released tracked resources on shutdown: {:?}", report);
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("session_id", &self.session_id)
            .field("controller", &self.controller)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::NoopHost;
    use async_trait::async_trait;
    use serde_json::{Value, json};

    struct Echo;

    #[async_trait]
    impl TaskHandler for Echo {
        async fn execute(&self, payload: Value) -> anyhow::Result<Value> {
            Ok(payload)
        }
    }

    #[test]
    fn test_engine_config_toml_serialization() {
        let config = EngineConfig::default();

        let toml_str = config
            .to_toml_string()
            .expect("Failed to serialize to TOML");
        assert!(toml_str.contains("[queue]"));
        assert!(toml_str.contains("[recovery.leak_thresholds]"));

        let deserialized =
            EngineConfig::from_toml_str(&toml_str).expect("Failed to deserialize from TOML");
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [queue]
            max_retries = 5

            [recovery]
            sample_interval_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.max_retries, 5);
        assert_eq!(config.queue.max_queue_size, QueueConfig::default().max_queue_size);
        assert_eq!(config.recovery.sample_interval_secs, 5);
        assert_eq!(config.health, HealthConfig::default());
    }

    #[test]
    fn test_engine_config_toml_file_operations() {
        use tempfile::NamedTempFile;

        let mut config = EngineConfig::default();
        config.queue.batch_size = 3;

        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        config
            .to_toml_file(temp_file.path())
            .expect("Failed to save config to file");

        let loaded =
            EngineConfig::from_toml_file(temp_file.path()).expect("Failed to load config from file");
        assert_eq!(loaded.queue.batch_size, 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.recovery.max_probe_failures = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.health.max_failure_ratio = 1.5;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_engine_wires_shared_tracker() {
        let engine = Engine::with_session_id(
            EngineConfig::default(),
            Arc::new(Echo),
            Arc::new(NoopHost),
            env::test::TEST_SESSION_ID,
        )
        .await
        .unwrap();

        assert!(engine.start_monitoring());
        let status = engine.status().await;
        assert_eq!(status.session_id, env::test::TEST_SESSION_ID);
        assert_eq!(status.resources.repeating_timers, 1);
        assert!(status.recovery.monitoring);
        assert!(status.is_healthy);

        engine.shutdown().await.unwrap();
        let status = engine.status().await;
        assert_eq!(status.resources.total(), 0);
        assert!(!status.recovery.monitoring);
        assert!(engine.queue().is_paused());
    }

    #[tokio::test]
    async fn test_shutdown_persists_host_state() {
        let engine = Engine::new(EngineConfig::default(), Arc::new(Echo), Arc::new(NoopHost))
            .await
            .unwrap();
        let mut state = SessionState::new();
        state.insert("cursor".to_string(), json!(3));
        assert!(engine.save_state(&state).await);
        assert_eq!(engine.restore_state().await, Some(state));

        // NoopHost captures an empty state, which replaces the snapshot.
        engine.shutdown().await.unwrap();
        assert_eq!(engine.restore_state().await, Some(SessionState::new()));
    }
}
