use crate::env;
use crate::env::operations::{SESSION_RESTORE, SESSION_SAVE};
use crate::hooks::{HookContext, HookPipeline};
use crate::session::store::KeyValueStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Opaque session state; values are whatever the host chooses to persist
pub type SessionState = serde_json::Map<String, Value>;

/// Envelope written to the store for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub saved_at: DateTime<Utc>,
    pub format_version: u32,
    pub state: SessionState,
}

/// Where and under which key session snapshots are kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Directory of the file-backed store; snapshots stay in memory when unset
    pub store_dir: Option<PathBuf>,
    pub snapshot_key: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            store_dir: None,
            snapshot_key: env::session::SNAPSHOT_KEY.to_string(),
        }
    }
}

/// Best-effort snapshot and restore of session state.
///
/// Neither direction ever returns an error: failures are logged and reported
/// as `false` / `None`.
pub struct SessionPersistence {
    session_id: String,
    snapshot_key: String,
    store: Arc<dyn KeyValueStore>,
    hooks: Option<Arc<HookPipeline>>,
}

impl SessionPersistence {
    pub fn new(session_id: impl Into<String>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            session_id: session_id.into(),
            snapshot_key: env::session::SNAPSHOT_KEY.to_string(),
            store,
            hooks: None,
        }
    }

    pub fn with_snapshot_key(mut self, key: impl Into<String>) -> Self {
        self.snapshot_key = key.into();
        self
    }

    /// Run the `session.save` / `session.restore` hooks around persistence
    pub fn with_hooks(mut self, hooks: Arc<HookPipeline>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn snapshot_key(&self) -> &str {
        &self.snapshot_key
    }

    /// Persist `state`; returns whether a snapshot was written
    pub async fn save_state(&self, state: &SessionState) -> bool {
        let state = match self.run_hooks(SESSION_SAVE, state.clone()).await {
            Some(state) => state,
            None => return false,
        };

        let snapshot = SessionSnapshot {
            session_id: self.session_id.clone(),
            saved_at: Utc::now(),
            format_version: env::session::SNAPSHOT_FORMAT_VERSION,
            state,
        };

        let value = match serde_json::to_value(&snapshot) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to serialize session {}: {}", self.session_id, e);
                return false;
            }
        };

        match self.store.set(&self.snapshot_key, value).await {
            Ok(()) => {
                info!(
                    "Saved session {} ({} entries)",
                    self.session_id,
                    snapshot.state.len()
                );
                true
            }
            Err(e) => {
                warn!("Failed to save session {}: {}", self.session_id, e);
                false
            }
        }
    }

    /// Load the last snapshot, if one exists and can be read
    pub async fn restore_state(&self) -> Option<SessionState> {
        let value = match self.store.get(&self.snapshot_key).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                debug!("No saved session under '{}'", self.snapshot_key);
                return None;
            }
            Err(e) => {
                warn!("Failed to read session snapshot: {}", e);
                return None;
            }
        };

        let snapshot: SessionSnapshot = match serde_json::from_value(value) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Discarding unreadable session snapshot: {}", e);
                return None;
            }
        };

        if snapshot.format_version != env::session::SNAPSHOT_FORMAT_VERSION {
            warn!(
                "Discarding session snapshot with format version {} (expected {})",
                snapshot.format_version,
                env::session::SNAPSHOT_FORMAT_VERSION
            );
            return None;
        }

        let state = self.run_hooks(SESSION_RESTORE, snapshot.state).await?;
        info!(
            "Restored session {} saved at {}",
            snapshot.session_id, snapshot.saved_at
        );
        Some(state)
    }

    /// Forget the stored snapshot
    pub async fn clear(&self) -> bool {
        match self.store.remove(&self.snapshot_key).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Failed to clear session snapshot: {}", e);
                false
            }
        }
    }

    /// Pass `state` through the operation's hooks; `None` when a blocking
    /// hook rejects it or a hook leaves something other than an object
    async fn run_hooks(&self, operation: &str, state: SessionState) -> Option<SessionState> {
        let Some(hooks) = &self.hooks else {
            return Some(state);
        };

        let mut context = HookContext::new(operation, Value::Object(state))
            .with_metadata("session_id", self.session_id.clone());
        let chain = hooks.execute_hooks(operation, &mut context).await;
        if !chain.success {
            warn!(
                "Hooks rejected {} for session {}: {}",
                operation,
                self.session_id,
                chain
                    .blocking_error()
                    .map(|error| error.to_string())
                    .unwrap_or_default()
            );
            return None;
        }

        match context.content {
            Value::Object(state) => Some(state),
            other => {
                warn!(
                    "Hook on {} replaced session state with a non-object ({})",
                    operation, other
                );
                None
            }
        }
    }
}

impl std::fmt::Debug for SessionPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPersistence")
            .field("session_id", &self.session_id)
            .field("snapshot_key", &self.snapshot_key)
            .finish()
    }
}
