use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Default per-hook timeout when none is configured
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether a hook runs ahead of the wrapped work or after it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookKind {
    /// Pre hooks may rewrite the content seen by later hooks and the handler
    Pre,
    /// Post hooks observe the result; their modifications are not merged
    Post,
}

/// Typed value stored in a hook context's metadata map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Flag(bool),
    Json(serde_json::Value),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Integer(value)
    }
}

impl From<u32> for MetadataValue {
    fn from(value: u32) -> Self {
        MetadataValue::Integer(value as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Flag(value)
    }
}

/// State threaded through one hook chain invocation
#[derive(Debug, Clone)]
pub struct HookContext {
    pub operation: String,
    pub content: serde_json::Value,
    pub metadata: HashMap<String, MetadataValue>,
    pub timestamp: DateTime<Utc>,
}

impl HookContext {
    pub fn new(operation: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            operation: operation.into(),
            content,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata(&self, key: &str) -> Option<&MetadataValue> {
        self.metadata.get(key)
    }
}

/// What a hook action reports back to the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct HookOutcome {
    pub success: bool,
    pub message: Option<String>,
    pub modified_content: Option<serde_json::Value>,
}

impl HookOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            message: None,
            modified_content: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            modified_content: None,
        }
    }

    pub fn modified(content: serde_json::Value) -> Self {
        Self {
            success: true,
            message: None,
            modified_content: Some(content),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Work performed by a hook
#[async_trait]
pub trait HookAction: Send + Sync {
    async fn run(&self, context: &HookContext) -> anyhow::Result<HookOutcome>;
}

/// Adapts an async closure into a [`HookAction`]
pub struct FnHook<F>(pub F);

#[async_trait]
impl<F, Fut> HookAction for FnHook<F>
where
    F: Fn(HookContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<HookOutcome>> + Send,
{
    async fn run(&self, context: &HookContext) -> anyhow::Result<HookOutcome> {
        (self.0)(context.clone()).await
    }
}

/// A registered unit of pre/post work
pub struct Hook {
    pub id: String,
    pub kind: HookKind,
    /// Lower runs first
    pub priority: i32,
    pub blocking: bool,
    pub timeout: Duration,
    enabled: AtomicBool,
    action: Arc<dyn HookAction>,
}

impl Hook {
    pub fn new(id: impl Into<String>, kind: HookKind, action: impl HookAction + 'static) -> Self {
        Self {
            id: id.into(),
            kind,
            priority: 100,
            blocking: false,
            timeout: DEFAULT_HOOK_TIMEOUT,
            enabled: AtomicBool::new(true),
            action: Arc::new(action),
        }
    }

    /// Build a hook from an async closure
    pub fn from_fn<F, Fut>(id: impl Into<String>, kind: HookKind, action: F) -> Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<HookOutcome>> + Send + 'static,
    {
        Self::new(id, kind, FnHook(action))
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn disabled(self) -> Self {
        self.enabled.store(false, Ordering::SeqCst);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub(crate) fn action(&self) -> &Arc<dyn HookAction> {
        &self.action
    }

    pub fn info(&self) -> HookInfo {
        HookInfo {
            id: self.id.clone(),
            kind: self.kind,
            priority: self.priority,
            enabled: self.is_enabled(),
            blocking: self.blocking,
            timeout: self.timeout,
        }
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("blocking", &self.blocking)
            .field("timeout", &self.timeout)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Read-only view of a registered hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookInfo {
    pub id: String,
    pub kind: HookKind,
    pub priority: i32,
    pub enabled: bool,
    pub blocking: bool,
    pub timeout: Duration,
}

/// Ways a single hook can fail
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HookError {
    #[error("Hook {hook_id} timed out after {timeout:?}")]
    Timeout { hook_id: String, timeout: Duration },

    #[error("Hook {hook_id} failed: {message}")]
    Execution { hook_id: String, message: String },

    #[error("Hook {hook_id} panicked")]
    Panicked { hook_id: String },
}

/// Record of one hook's run inside a chain
#[derive(Debug, Clone)]
pub struct HookResult {
    pub hook_id: String,
    pub success: bool,
    pub message: Option<String>,
    pub modified: bool,
    pub duration: Duration,
    pub error: Option<HookError>,
}

/// Result of running every enabled hook of one operation
#[derive(Debug, Clone)]
pub struct HookChainResult {
    pub success: bool,
    pub results: Vec<HookResult>,
}

impl HookChainResult {
    /// The error of the hook that halted the chain, if any
    pub fn blocking_error(&self) -> Option<&HookError> {
        if self.success {
            return None;
        }
        self.results.last().and_then(|result| result.error.as_ref())
    }

    pub fn failures(&self) -> impl Iterator<Item = &HookResult> {
        self.results.iter().filter(|result| !result.success)
    }
}
