use crate::env::operations::DEFAULT_OPERATIONS;
use crate::hooks::types::*;
use crate::resources::ResourceTracker;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Ordered pre/post hook execution per named operation
pub struct HookPipeline {
    operations: RwLock<HashMap<String, Vec<Arc<Hook>>>>,
    default_operations: Vec<String>,
    resources: ResourceTracker,
}

impl HookPipeline {
    pub fn new(resources: ResourceTracker) -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
            default_operations: DEFAULT_OPERATIONS.iter().map(|op| op.to_string()).collect(),
            resources,
        }
    }

    /// Override the operations a hook joins when registered without one
    pub fn with_default_operations(mut self, operations: Vec<String>) -> Self {
        self.default_operations = operations;
        self
    }

    pub fn default_operations(&self) -> &[String] {
        &self.default_operations
    }

    /// Register a hook on `operation`, or on every default operation when none
    /// is given. A hook with the same id on the same operation is replaced.
    pub async fn register_hook(&self, hook: Hook, operation: Option<&str>) {
        let hook = Arc::new(hook);
        let targets: Vec<String> = match operation {
            Some(operation) => vec![operation.to_string()],
            None => self.default_operations.clone(),
        };

        let mut operations = self.operations.write().await;
        for target in targets {
            let hooks = operations.entry(target.clone()).or_default();
            hooks.retain(|existing| existing.id != hook.id);
            hooks.push(hook.clone());
            // Stable sort keeps registration order among equal priorities.
            hooks.sort_by_key(|existing| existing.priority);
            debug!(
                "Registered hook {} on {} (priority {})",
                hook.id, target, hook.priority
            );
        }
    }

    /// Remove a hook from every operation; returns whether it was present
    pub async fn unregister_hook(&self, hook_id: &str) -> bool {
        let mut operations = self.operations.write().await;
        let mut removed = false;
        for hooks in operations.values_mut() {
            let before = hooks.len();
            hooks.retain(|hook| hook.id != hook_id);
            removed |= hooks.len() != before;
        }
        removed
    }

    pub async fn enable_hook(&self, hook_id: &str) -> bool {
        self.set_enabled(hook_id, true).await
    }

    pub async fn disable_hook(&self, hook_id: &str) -> bool {
        self.set_enabled(hook_id, false).await
    }

    async fn set_enabled(&self, hook_id: &str, enabled: bool) -> bool {
        let operations = self.operations.read().await;
        let mut found = false;
        for hook in operations.values().flatten().filter(|hook| hook.id == hook_id) {
            hook.set_enabled(enabled);
            found = true;
        }
        if found {
            info!("Hook {} {}", hook_id, if enabled { "enabled" } else { "disabled" });
        } else {
            warn!("No hook registered with id {}", hook_id);
        }
        found
    }

    /// Registered hooks of an operation in execution order
    pub async fn get_hooks(&self, operation: &str) -> Vec<HookInfo> {
        let operations = self.operations.read().await;
        operations
            .get(operation)
            .map(|hooks| hooks.iter().map(|hook| hook.info()).collect())
            .unwrap_or_default()
    }

    pub async fn operations(&self) -> Vec<String> {
        let operations = self.operations.read().await;
        let mut names: Vec<String> = operations.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run every enabled hook of `operation` sequentially in priority order.
    ///
    /// A pre hook's modified content replaces `context.content` before the
    /// next hook runs. A failing blocking hook stops the chain and the result
    /// holds only the hooks that ran; non-blocking failures are recorded and
    /// the chain continues.
    pub async fn execute_hooks(&self, operation: &str, context: &mut HookContext) -> HookChainResult {
        let hooks: Vec<Arc<Hook>> = {
            let operations = self.operations.read().await;
            operations.get(operation).cloned().unwrap_or_default()
        };

        let mut results = Vec::new();

        for hook in hooks {
            if !hook.is_enabled() {
                debug!("Skipping disabled hook {} on {}", hook.id, operation);
                continue;
            }

            let started = Instant::now();
            let outcome = self.run_hook(&hook, operation, context).await;
            let duration = started.elapsed();

            match outcome {
                Ok(outcome) => {
                    let modified = match (hook.kind, outcome.modified_content) {
                        (HookKind::Pre, Some(content)) => {
                            context.content = content;
                            true
                        }
                        _ => false,
                    };
                    results.push(HookResult {
                        hook_id: hook.id.clone(),
                        success: true,
                        message: outcome.message,
                        modified,
                        duration,
                        error: None,
                    });
                }
                Err(error) => {
                    results.push(HookResult {
                        hook_id: hook.id.clone(),
                        success: false,
                        message: Some(error.to_string()),
                        modified: false,
                        duration,
                        error: Some(error.clone()),
                    });

                    if hook.blocking {
                        warn!("Blocking hook halted {}: {}", operation, error);
                        return HookChainResult {
                            success: false,
                            results,
                        };
                    }
                    debug!("Non-blocking hook failure on {}: {}", operation, error);
                }
            }
        }

        HookChainResult {
            success: true,
            results,
        }
    }

    async fn run_hook(
        &self,
        hook: &Hook,
        operation: &str,
        context: &HookContext,
    ) -> Result<HookOutcome, HookError> {
        let action = hook.action().clone();
        let run = AssertUnwindSafe(async move { action.run(context).await }).catch_unwind();
        let tracked = self
            .resources
            .track_operation(format!("hook:{}:{}", operation, hook.id), run);

        match tokio::time::timeout(hook.timeout, tracked).await {
            Err(_) => Err(HookError::Timeout {
                hook_id: hook.id.clone(),
                timeout: hook.timeout,
            }),
            Ok(Err(_)) => Err(HookError::Panicked {
                hook_id: hook.id.clone(),
            }),
            Ok(Ok(Err(error))) => Err(HookError::Execution {
                hook_id: hook.id.clone(),
                message: format!("{:#}", error),
            }),
            Ok(Ok(Ok(outcome))) if !outcome.success => Err(HookError::Execution {
                hook_id: hook.id.clone(),
                message: outcome
                    .message
                    .unwrap_or_else(|| "hook reported failure".to_string()),
            }),
            Ok(Ok(Ok(outcome))) => Ok(outcome),
        }
    }
}

impl Default for HookPipeline {
    fn default() -> Self {
        Self::new(ResourceTracker::new())
    }
}
