use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Opaque token identifying a tracked resource
pub type ResourceId = u64;

/// Category a tracked resource belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Timer,
    RepeatingTimer,
    Operation,
    Disposable,
}

/// How a resource is released when it is cancelled
enum Cancellation {
    Abort(AbortHandle),
    Dispose(std::sync::Mutex<Option<Box<dyn FnOnce() + Send>>>),
    Release,
}

struct TrackedResource {
    kind: ResourceKind,
    label: String,
    created_at: DateTime<Utc>,
    cancellation: Cancellation,
}

impl TrackedResource {
    fn cancel(self) {
        match self.cancellation {
            Cancellation::Abort(handle) => handle.abort(),
            Cancellation::Dispose(slot) => {
                let dispose = match slot.into_inner() {
                    Ok(dispose) => dispose,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if let Some(dispose) = dispose {
                    dispose();
                }
            }
            Cancellation::Release => {}
        }
    }
}

/// Live resource counts per category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCounts {
    pub timers: usize,
    pub repeating_timers: usize,
    pub operations: usize,
    pub disposables: usize,
}

impl ResourceCounts {
    pub fn total(&self) -> usize {
        self.timers + self.repeating_timers + self.operations + self.disposables
    }
}

/// Counts above which a category is reported as leaking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeakThresholds {
    pub max_timers: usize,
    pub max_repeating_timers: usize,
    pub max_operations: usize,
}

impl Default for LeakThresholds {
    fn default() -> Self {
        Self {
            max_timers: 100,
            max_repeating_timers: 10,
            max_operations: 50,
        }
    }
}

/// A category whose live count exceeded its threshold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakReport {
    pub kind: ResourceKind,
    pub count: usize,
    pub threshold: usize,
}

/// What a cleanup pass released
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub timers_cancelled: usize,
    pub repeating_timers_cancelled: usize,
    pub operations_released: usize,
    pub disposables_disposed: usize,
}

/// Description of a live resource, for diagnostics
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

struct TrackerInner {
    next_id: AtomicU64,
    resources: DashMap<ResourceId, TrackedResource>,
}

/// Registry of timers, repeating timers, in-flight operations and disposables.
///
/// Every resource is created through one scheduling path and identified by an
/// opaque [`ResourceId`], so cancellation and cleanup are uniform across kinds.
#[derive(Clone)]
pub struct ResourceTracker {
    inner: Arc<TrackerInner>,
}

/// Removes an in-flight operation from the registry when dropped
pub struct OperationGuard {
    id: ResourceId,
    registry: Weak<TrackerInner>,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.resources.remove(&self.id);
        }
    }
}

impl OperationGuard {
    pub fn id(&self) -> ResourceId {
        self.id
    }
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                next_id: AtomicU64::new(1),
                resources: DashMap::new(),
            }),
        }
    }

    fn next_id(&self) -> ResourceId {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn insert(&self, id: ResourceId, kind: ResourceKind, label: String, cancellation: Cancellation) {
        debug!("Tracking {:?} resource {} ({})", kind, id, label);
        self.inner.resources.insert(
            id,
            TrackedResource {
                kind,
                label,
                created_at: Utc::now(),
                cancellation,
            },
        );
    }

    /// Run `work` once after `delay`. The timer untracks itself when it fires.
    pub fn schedule_once<F>(&self, label: impl Into<String>, delay: Duration, work: F) -> ResourceId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id();
        let registry = Arc::downgrade(&self.inner);
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            // The entry must exist before the timer can remove it.
            let _ = registered_rx.await;
            tokio::time::sleep(delay).await;
            if let Some(inner) = registry.upgrade() {
                inner.resources.remove(&id);
            }
            work.await;
        });

        self.insert(
            id,
            ResourceKind::Timer,
            label.into(),
            Cancellation::Abort(handle.abort_handle()),
        );
        let _ = registered_tx.send(());
        id
    }

    /// Run `tick` every `period` until the returned resource is cancelled.
    /// The first run happens one full period after scheduling.
    pub fn schedule_repeating<F, Fut>(
        &self,
        label: impl Into<String>,
        period: Duration,
        mut tick: F,
    ) -> ResourceId
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id();
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tick().await;
            }
        });

        self.insert(
            id,
            ResourceKind::RepeatingTimer,
            label.into(),
            Cancellation::Abort(handle.abort_handle()),
        );
        id
    }

    /// Track a task spawned elsewhere as a timer or repeating timer
    pub fn track_task(
        &self,
        kind: ResourceKind,
        label: impl Into<String>,
        handle: AbortHandle,
    ) -> ResourceId {
        let id = self.next_id();
        self.insert(id, kind, label.into(), Cancellation::Abort(handle));
        id
    }

    /// Register an in-flight operation; it is untracked when the guard drops
    pub fn begin_operation(&self, label: impl Into<String>) -> OperationGuard {
        let id = self.next_id();
        self.insert(id, ResourceKind::Operation, label.into(), Cancellation::Release);
        OperationGuard {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Wrap a future so it counts as in-flight until it settles or is dropped
    pub fn track_operation<L, F>(
        &self,
        label: L,
        operation: F,
    ) -> impl Future<Output = F::Output> + use<L, F>
    where
        L: Into<String>,
        F: Future,
    {
        let guard = self.begin_operation(label);
        async move {
            let output = operation.await;
            drop(guard);
            output
        }
    }

    /// Register a cleanup callback that runs when the resource is cancelled
    pub fn register_disposable<F>(&self, label: impl Into<String>, dispose: F) -> ResourceId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.next_id();
        self.insert(
            id,
            ResourceKind::Disposable,
            label.into(),
            Cancellation::Dispose(std::sync::Mutex::new(Some(Box::new(dispose)))),
        );
        id
    }

    /// Forget a resource without cancelling it
    pub fn untrack(&self, id: ResourceId) -> bool {
        self.inner.resources.remove(&id).is_some()
    }

    /// Forget a resource and cancel (or dispose) it
    pub fn cancel(&self, id: ResourceId) -> bool {
        match self.inner.resources.remove(&id) {
            Some((_, resource)) => {
                debug!("Cancelling {:?} resource {} ({})", resource.kind, id, resource.label);
                resource.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_tracked(&self, id: ResourceId) -> bool {
        self.inner.resources.contains_key(&id)
    }

    pub fn counts(&self) -> ResourceCounts {
        let mut counts = ResourceCounts::default();
        for entry in self.inner.resources.iter() {
            match entry.kind {
                ResourceKind::Timer => counts.timers += 1,
                ResourceKind::RepeatingTimer => counts.repeating_timers += 1,
                ResourceKind::Operation => counts.operations += 1,
                ResourceKind::Disposable => counts.disposables += 1,
            }
        }
        counts
    }

    pub fn resources(&self) -> Vec<ResourceInfo> {
        let mut resources: Vec<ResourceInfo> = self
            .inner
            .resources
            .iter()
            .map(|entry| ResourceInfo {
                id: *entry.key(),
                kind: entry.kind,
                label: entry.label.clone(),
                created_at: entry.created_at,
            })
            .collect();
        resources.sort_by_key(|info| info.id);
        resources
    }

    /// Categories whose live count exceeds the given thresholds
    pub fn detect_leaks(&self, thresholds: &LeakThresholds) -> Vec<LeakReport> {
        let counts = self.counts();
        let mut leaks = Vec::new();

        for (kind, count, threshold) in [
            (ResourceKind::Timer, counts.timers, thresholds.max_timers),
            (
                ResourceKind::RepeatingTimer,
                counts.repeating_timers,
                thresholds.max_repeating_timers,
            ),
            (ResourceKind::Operation, counts.operations, thresholds.max_operations),
        ] {
            if count > threshold {
                warn!(
                    "Possible {:?} leak: {} live (threshold {})",
                    kind, count, threshold
                );
                leaks.push(LeakReport {
                    kind,
                    count,
                    threshold,
                });
            }
        }

        leaks
    }

    /// Cancel every timer and repeating timer, dispose every disposable and
    /// forget every in-flight operation.
    pub fn cleanup_leaked_resources(&self) -> CleanupReport {
        let ids: Vec<ResourceId> = self.inner.resources.iter().map(|entry| *entry.key()).collect();
        let mut report = CleanupReport::default();

        for id in ids {
            if let Some((_, resource)) = self.inner.resources.remove(&id) {
                match resource.kind {
                    ResourceKind::Timer => report.timers_cancelled += 1,
                    ResourceKind::RepeatingTimer => report.repeating_timers_cancelled += 1,
                    ResourceKind::Operation => report.operations_released += 1,
                    ResourceKind::Disposable => report.disposables_disposed += 1,
                }
                resource.cancel();
            }
        }

        info!(
            "Resource cleanup: {} timers, {} repeating timers, {} operations, {} disposables",
            report.timers_cancelled,
            report.repeating_timers_cancelled,
            report.operations_released,
            report.disposables_disposed
        );
        report
    }
}

impl Default for ResourceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResourceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTracker")
            .field("counts", &self.counts())
            .finish()
    }
}
