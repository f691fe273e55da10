use crate::health::{HealthIssue, HealthMonitor};
use crate::recovery::classifier::ErrorClassifier;
use crate::recovery::host::RecoveryHost;
use crate::recovery::journal::{ErrorJournal, ErrorSource};
use crate::recovery::types::*;
use crate::resources::{BYTES_PER_MB, ResourceId, ResourceTracker};
use crate::session::SessionPersistence;
use crate::task::{DegradationReason, RecoveryTrigger, TaskQueue, WeakTaskQueue};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

const MAX_RETAINED_ALERTS: usize = 100;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clears a busy flag when a recovery or sampling pass ends, however it ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct ControllerInner {
    config: RecoveryConfig,
    queue: WeakTaskQueue,
    resources: ResourceTracker,
    journal: Arc<ErrorJournal>,
    health: Arc<HealthMonitor>,
    classifier: ErrorClassifier,
    persistence: Arc<SessionPersistence>,
    host: Arc<dyn RecoveryHost>,
    in_progress: AtomicBool,
    sampling: AtomicBool,
    irrecoverable: AtomicBool,
    probe_failures: AtomicU32,
    dead_letter_alerted: AtomicBool,
    sampler: Mutex<Option<ResourceId>>,
    alerts: Mutex<Vec<Alert>>,
    last_strategy: Mutex<Option<StrategyKind>>,
}

/// Periodic sampler that detects degradation and escalates remediation from
/// cleanup through restart and reset to graceful shutdown.
///
/// At most one recovery runs at a time; requests arriving while one is in
/// flight are dropped. Once every level has failed the controller marks
/// itself irrecoverable, stops sampling and raises a critical alert asking
/// for a manual restart.
#[derive(Clone)]
pub struct RecoveryController {
    inner: Arc<ControllerInner>,
}

impl RecoveryController {
    /// Build a controller over `queue`'s tracker, journal and health monitor
    /// and register it as the queue's recovery trigger.
    pub fn new(
        config: RecoveryConfig,
        queue: &TaskQueue,
        persistence: Arc<SessionPersistence>,
        host: Arc<dyn RecoveryHost>,
    ) -> Self {
        let controller = Self {
            inner: Arc::new(ControllerInner {
                classifier: ErrorClassifier::new(config.error_ceiling),
                config,
                queue: queue.downgrade(),
                resources: queue.resources().clone(),
                journal: queue.journal().clone(),
                health: queue.health().clone(),
                persistence,
                host,
                in_progress: AtomicBool::new(false),
                sampling: AtomicBool::new(false),
                irrecoverable: AtomicBool::new(false),
                probe_failures: AtomicU32::new(0),
                dead_letter_alerted: AtomicBool::new(false),
                sampler: Mutex::new(None),
                alerts: Mutex::new(Vec::new()),
                last_strategy: Mutex::new(None),
            }),
        };

        queue.set_recovery_trigger(Arc::new(controller.clone()));
        controller
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.inner.config
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.inner.classifier
    }

    /// Start the fixed-interval sampler; false if it is already running or
    /// the controller has given up
    pub fn start_monitoring(&self) -> bool {
        if self.is_irrecoverable() {
            warn!("Not starting recovery monitoring, controller is irrecoverable");
            return false;
        }

        let mut sampler = lock(&self.inner.sampler);
        if sampler.is_some_and(|id| self.inner.resources.is_tracked(id)) {
            return false;
        }

        let interval = self.inner.config.sample_interval();
        let controller = Arc::downgrade(&self.inner);
        let id = self
            .inner
            .resources
            .schedule_repeating("recovery:sampler", interval, move || {
                let controller = controller.clone();
                async move {
                    if let Some(inner) = controller.upgrade() {
                        // Detached so cancelling the sampler never cuts a
                        // remediation short.
                        tokio::spawn(RecoveryController { inner }.run_checks());
                    }
                }
            });
        *sampler = Some(id);

        info!("Recovery monitoring started (every {:?})", interval);
        true
    }

    pub fn stop_monitoring(&self) -> bool {
        let Some(id) = lock(&self.inner.sampler).take() else {
            return false;
        };
        let stopped = self.inner.resources.cancel(id);
        if stopped {
            info!("Recovery monitoring stopped");
        }
        stopped
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.inner.sampler).is_some_and(|id| self.inner.resources.is_tracked(id))
    }

    pub fn is_in_progress(&self) -> bool {
        self.inner.in_progress.load(Ordering::SeqCst)
    }

    pub fn is_irrecoverable(&self) -> bool {
        self.inner.irrecoverable.load(Ordering::SeqCst)
    }

    /// Acknowledge a manual restart so automatic recovery may run again
    pub fn clear_irrecoverable(&self) {
        if self.inner.irrecoverable.swap(false, Ordering::SeqCst) {
            self.inner.probe_failures.store(0, Ordering::SeqCst);
            info!("Recovery controller re-armed after manual restart");
        }
    }

    pub fn alerts(&self) -> Vec<Alert> {
        lock(&self.inner.alerts).clone()
    }

    pub fn status(&self) -> RecoveryStatus {
        RecoveryStatus {
            monitoring: self.is_monitoring(),
            in_progress: self.is_in_progress(),
            irrecoverable: self.is_irrecoverable(),
            consecutive_probe_failures: self.inner.probe_failures.load(Ordering::SeqCst),
            accumulated_errors: self.inner.journal.len(),
            last_strategy: *lock(&self.inner.last_strategy),
            alerts: lock(&self.inner.alerts).len(),
        }
    }

    /// One sampling pass: memory, tracked resources, accumulated errors,
    /// queue health, dead letters, then responsiveness. A pass that starts
    /// while the previous one is still running is skipped.
    pub async fn run_checks(self) {
        if self.is_irrecoverable() {
            return;
        }
        let Ok(_) = self.inner.sampling.compare_exchange(
            false,
            true,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) else {
            debug!("Previous sampling pass still running, skipping");
            return;
        };
        let _sampling = InFlight(&self.inner.sampling);

        self.check_memory().await;
        self.check_resources().await;
        self.check_errors().await;
        self.check_health().await;
        self.check_dead_letters().await;
        self.check_responsiveness().await;
    }

    async fn check_memory(&self) {
        let Some(resident) = self.inner.host.memory_usage() else {
            return;
        };
        if resident <= self.inner.config.memory_threshold_bytes() {
            return;
        }

        let reason = format!(
            "resident memory {} MB above {} MB",
            resident / BYTES_PER_MB,
            self.inner.config.memory_threshold_mb
        );
        warn!("{}", reason);
        self.log_failure(self.execute_strategy(StrategyKind::Cleanup, reason).await);
    }

    async fn check_resources(&self) {
        let leaks = self
            .inner
            .resources
            .detect_leaks(&self.inner.config.leak_thresholds);
        if leaks.is_empty() {
            return;
        }

        let reason = leaks
            .iter()
            .map(|leak| format!("{} {:?} (limit {})", leak.count, leak.kind, leak.threshold))
            .collect::<Vec<_>>()
            .join(", ");
        self.log_failure(
            self.execute_strategy(StrategyKind::Cleanup, format!("resource leak: {}", reason))
                .await,
        );
    }

    async fn check_errors(&self) {
        let messages = self.inner.journal.messages();
        if messages.is_empty() {
            return;
        }

        if let Some(kind) = self.inner.classifier.determine_strategy(&messages) {
            let reason = format!("{} accumulated errors", messages.len());
            self.log_failure(self.execute_strategy(kind, reason).await);
        }
    }

    /// In-flight tasks only show up here, since the queue's own gate runs
    /// after a batch has settled. A stall asks for a restart.
    async fn check_health(&self) {
        let Some(queue) = self.inner.queue.upgrade() else {
            return;
        };
        let issues = self.inner.health.assess(&queue.stats().await);
        if issues.is_empty() {
            return;
        }

        let stalled = issues
            .iter()
            .any(|issue| matches!(issue, HealthIssue::Stalled { .. }));
        let score = self.inner.health.score();
        let issues: Vec<String> = issues.iter().map(|issue| issue.to_string()).collect();

        if stalled {
            warn!("Queue stalled: {}", issues.join(", "));
            let reason = format!("queue stalled (score {}): {}", score, issues.join(", "));
            self.log_failure(self.execute_strategy(StrategyKind::Restart, reason).await);
        } else {
            self.remediate_unhealthy(score, &issues).await;
        }
    }

    /// Let the classifier pick a strategy from the journal; only logged when
    /// none is warranted
    async fn remediate_unhealthy(&self, score: u8, issues: &[String]) {
        let messages = self.inner.journal.messages();
        let Some(kind) = self.inner.classifier.determine_strategy(&messages) else {
            debug!(
                "Queue unhealthy (score {}) but no strategy warranted: {}",
                score,
                issues.join(", ")
            );
            return;
        };
        let reason = format!("queue unhealthy (score {}): {}", score, issues.join(", "));
        self.log_failure(self.execute_strategy(kind, reason).await);
    }

    async fn check_dead_letters(&self) {
        let Some(queue) = self.inner.queue.upgrade() else {
            return;
        };
        let dead_lettered = queue.stats().await.dead_lettered;
        let threshold = self.inner.config.dead_letter_alert_threshold;

        if dead_lettered <= threshold {
            self.inner.dead_letter_alerted.store(false, Ordering::SeqCst);
            return;
        }
        if !self.inner.dead_letter_alerted.swap(true, Ordering::SeqCst) {
            self.raise_alert(Alert::new(
                AlertLevel::Warning,
                format!(
                    "{} tasks dead-lettered (alert threshold {})",
                    dead_lettered, threshold
                ),
            ))
            .await;
        }
    }

    async fn check_responsiveness(&self) {
        let timeout = self.inner.config.probe_timeout();
        let failure = match tokio::time::timeout(timeout, self.inner.host.probe()).await {
            Ok(Ok(())) => {
                self.inner.probe_failures.store(0, Ordering::SeqCst);
                return;
            }
            Ok(Err(e)) => format!("Responsiveness probe failed: {:#}", e),
            Err(_) => format!("Responsiveness probe timed out after {:?}", timeout),
        };

        let failures = self.inner.probe_failures.fetch_add(1, Ordering::SeqCst) + 1;
        warn!("{} ({} consecutive)", failure, failures);
        self.inner.journal.record(ErrorSource::Probe, failure);

        if failures >= self.inner.config.max_probe_failures {
            self.log_failure(self.full_session_recovery().await);
        }
    }

    fn log_failure(&self, result: Result<RecoveryOutcome, RecoveryError>) {
        if let Err(e) = result {
            debug!("Recovery ended without remediation: {}", e);
        }
    }

    fn begin_recovery(&self) -> Option<InFlight<'_>> {
        self.inner
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlight(&self.inner.in_progress))
    }

    /// Run `kind`, retrying with doubling backoff and escalating to the next
    /// strategy once its attempts are used up
    pub async fn execute_strategy(
        &self,
        kind: StrategyKind,
        reason: impl Into<String>,
    ) -> Result<RecoveryOutcome, RecoveryError> {
        let reason = reason.into();
        if self.is_irrecoverable() {
            debug!("Ignoring {} request ({}), controller is irrecoverable", kind, reason);
            return Ok(RecoveryOutcome::Skipped);
        }
        let Some(_in_flight) = self.begin_recovery() else {
            debug!("Recovery already in progress, dropping {} ({})", kind, reason);
            return Ok(RecoveryOutcome::Skipped);
        };

        info!("Starting {} recovery: {}", kind, reason);
        let mut next = Some(kind);
        let mut last_error = String::new();

        while let Some(kind) = next {
            let mut strategy = RecoveryStrategy::new(kind, reason.clone(), &self.inner.config);

            while !strategy.is_exhausted() {
                strategy.attempt_count += 1;
                match self.apply(&strategy).await {
                    Ok(()) => {
                        info!(
                            "{} recovery succeeded on attempt {}",
                            kind, strategy.attempt_count
                        );
                        *lock(&self.inner.last_strategy) = Some(kind);
                        self.inner.journal.clear();
                        return Ok(RecoveryOutcome::Remediated(kind));
                    }
                    Err(e) => {
                        warn!(
                            "{} recovery attempt {}/{} failed: {}",
                            kind, strategy.attempt_count, strategy.max_attempts, e
                        );
                        last_error = e.to_string();
                        if !strategy.is_exhausted() {
                            tokio::time::sleep(strategy.backoff_delay).await;
                            strategy.backoff_delay = strategy.backoff_delay.saturating_mul(2);
                        }
                    }
                }
            }

            next = kind.next();
            if let Some(escalated) = next {
                warn!("Escalating recovery from {} to {}", kind, escalated);
            }
        }

        let error = RecoveryError::Exhausted { reason, last_error };
        self.give_up(&error).await;
        Err(error)
    }

    async fn apply(&self, strategy: &RecoveryStrategy) -> Result<(), RecoveryError> {
        let failed = |e: anyhow::Error| RecoveryError::ActionFailed {
            strategy: strategy.kind,
            message: format!("{:#}", e),
        };
        let queue = self.inner.queue.upgrade();

        match strategy.kind {
            StrategyKind::Cleanup => {
                self.inner.host.clear_caches().await.map_err(failed)?;
                let monitoring = self.is_monitoring();
                self.inner.resources.cleanup_leaked_resources();
                if monitoring {
                    self.start_monitoring();
                }
                if let Some(queue) = &queue {
                    queue.recover_stranded().await;
                }
            }
            StrategyKind::Restart => {
                if let Some(queue) = &queue {
                    queue.pause();
                }
                let restarted = self.restart_session().await;
                if let Some(queue) = &queue {
                    queue.resume();
                    queue.recover_stranded().await;
                }
                restarted.map_err(failed)?;
            }
            StrategyKind::Reset => {
                self.inner.health.reset();
                self.inner.journal.clear();
                self.inner.probe_failures.store(0, Ordering::SeqCst);
                if let Some(state) = self.inner.persistence.restore_state().await {
                    self.inner.host.apply_state(state).await.map_err(failed)?;
                }
                if let Some(queue) = &queue {
                    queue.recover_stranded().await;
                }
            }
            StrategyKind::GracefulShutdown => {
                if let Some(queue) = &queue {
                    queue.pause();
                }
                let state = self.inner.host.capture_state().await;
                if !self.inner.persistence.save_state(&state).await {
                    warn!("Session state was not saved before shutdown");
                }
                self.inner.host.stop_session().await.map_err(failed)?;
                self.raise_alert(
                    Alert::new(
                        AlertLevel::Critical,
                        "Task intake stopped after graceful shutdown; manual restart required",
                    )
                    .with_action(AlertAction::ManualRestart),
                )
                .await;
            }
        }

        Ok(())
    }

    async fn restart_session(&self) -> anyhow::Result<()> {
        self.inner.host.stop_session().await?;
        self.inner.host.start_session().await
    }

    /// Persist state, cycle the session (forcing it if a graceful cycle
    /// fails), restore state and reset failure counters
    pub async fn full_session_recovery(&self) -> Result<RecoveryOutcome, RecoveryError> {
        if self.is_irrecoverable() {
            return Ok(RecoveryOutcome::Skipped);
        }
        let Some(_in_flight) = self.begin_recovery() else {
            debug!("Recovery already in progress, dropping full session recovery");
            return Ok(RecoveryOutcome::Skipped);
        };

        warn!("Starting full session recovery");
        let queue = self.inner.queue.upgrade();
        if let Some(queue) = &queue {
            queue.pause();
        }

        let state = self.inner.host.capture_state().await;
        let saved = self.inner.persistence.save_state(&state).await;

        if let Err(e) = self.restart_session().await {
            warn!("Graceful session restart failed ({:#}), forcing restart", e);
            let monitoring = self.is_monitoring();
            self.inner.resources.cleanup_leaked_resources();

            if let Err(e) = self.inner.host.force_restart().await {
                let error = RecoveryError::Exhausted {
                    reason: "full session recovery".to_string(),
                    last_error: format!("forced restart failed: {:#}", e),
                };
                self.give_up(&error).await;
                return Err(error);
            }
            if monitoring {
                self.start_monitoring();
            }
        }

        if saved {
            if let Some(restored) = self.inner.persistence.restore_state().await {
                if let Err(e) = self.inner.host.apply_state(restored).await {
                    let error = RecoveryError::Exhausted {
                        reason: "full session recovery".to_string(),
                        last_error: format!("restoring session state failed: {:#}", e),
                    };
                    self.give_up(&error).await;
                    return Err(error);
                }
            }
        }

        self.inner.probe_failures.store(0, Ordering::SeqCst);
        self.inner.journal.clear();
        self.inner.health.reset();
        if let Some(queue) = &queue {
            queue.resume();
            queue.recover_stranded().await;
        }
        *lock(&self.inner.last_strategy) = Some(StrategyKind::Restart);

        info!("Full session recovery completed");
        Ok(RecoveryOutcome::Remediated(StrategyKind::Restart))
    }

    async fn give_up(&self, error: &RecoveryError) {
        error!("{}; automatic recovery disabled", error);
        self.inner.irrecoverable.store(true, Ordering::SeqCst);
        self.stop_monitoring();
        self.raise_alert(
            Alert::new(
                AlertLevel::Critical,
                format!("Automatic recovery gave up: {}. Manual restart required.", error),
            )
            .with_action(AlertAction::ManualRestart),
        )
        .await;
    }

    async fn raise_alert(&self, alert: Alert) {
        {
            let mut alerts = lock(&self.inner.alerts);
            alerts.push(alert.clone());
            if alerts.len() > MAX_RETAINED_ALERTS {
                let excess = alerts.len() - MAX_RETAINED_ALERTS;
                alerts.drain(..excess);
            }
        }
        self.inner.host.notify(&alert).await;
    }
}

#[async_trait]
impl RecoveryTrigger for RecoveryController {
    async fn request_recovery(&self, reason: DegradationReason) {
        match reason {
            DegradationReason::Unhealthy { score, issues } => {
                self.remediate_unhealthy(score, &issues).await;
            }
            DegradationReason::BatchTimeout { timeout } => {
                let result = self
                    .execute_strategy(
                        StrategyKind::Restart,
                        format!("batch run exceeded {:?}", timeout),
                    )
                    .await;
                self.log_failure(result);
            }
        }
    }
}

impl std::fmt::Debug for RecoveryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryController")
            .field("status", &self.status())
            .finish()
    }
}
