use crate::resources::{BYTES_PER_MB, LeakThresholds};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Remedial actions, in escalation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StrategyKind {
    /// Release tracked resources and host caches
    Cleanup,
    /// Stop and start the owning session
    Restart,
    /// Reset health, error and probe bookkeeping
    Reset,
    /// Pause intake, persist state and ask for a manual restart
    GracefulShutdown,
}

impl StrategyKind {
    /// The strategy tried once this one is exhausted
    pub fn next(self) -> Option<Self> {
        match self {
            StrategyKind::Cleanup => Some(StrategyKind::Restart),
            StrategyKind::Restart => Some(StrategyKind::Reset),
            StrategyKind::Reset => Some(StrategyKind::GracefulShutdown),
            StrategyKind::GracefulShutdown => None,
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StrategyKind::Cleanup => "cleanup",
            StrategyKind::Restart => "restart",
            StrategyKind::Reset => "reset",
            StrategyKind::GracefulShutdown => "gracefulShutdown",
        };
        f.write_str(name)
    }
}

/// One remediation in progress; discarded once it succeeds or is exhausted
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryStrategy {
    pub kind: StrategyKind,
    pub reason: String,
    pub attempt_count: u32,
    pub max_attempts: u32,
    /// Wait before the next attempt; doubles after every failure
    pub backoff_delay: Duration,
}

impl RecoveryStrategy {
    pub fn new(kind: StrategyKind, reason: impl Into<String>, config: &RecoveryConfig) -> Self {
        Self {
            kind,
            reason: reason.into(),
            attempt_count: 0,
            max_attempts: config.max_strategy_attempts,
            backoff_delay: config.strategy_backoff(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }
}

/// Sampler, probe and escalation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub sample_interval_secs: u64,
    pub memory_threshold_mb: u64,
    pub leak_thresholds: LeakThresholds,
    /// Accumulated errors above which a graceful shutdown is chosen
    pub error_ceiling: usize,
    pub probe_timeout_ms: u64,
    /// Consecutive probe failures that escalate to full session recovery
    pub max_probe_failures: u32,
    pub max_strategy_attempts: u32,
    pub strategy_backoff_ms: u64,
    /// Dead-lettered tasks above which a warning alert is raised
    pub dead_letter_alert_threshold: usize,
    pub journal_capacity: usize,
}

impl RecoveryConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn memory_threshold_bytes(&self) -> u64 {
        self.memory_threshold_mb.saturating_mul(BYTES_PER_MB)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn strategy_backoff(&self) -> Duration {
        Duration::from_millis(self.strategy_backoff_ms)
    }

    pub fn validate(&self) -> Result<(), RecoveryError> {
        let invalid = |reason: &str| Err(RecoveryError::InvalidConfig(reason.to_string()));

        if self.sample_interval_secs == 0 {
            return invalid("sample_interval_secs must be greater than zero");
        }
        if self.probe_timeout_ms == 0 {
            return invalid("probe_timeout_ms must be greater than zero");
        }
        if self.max_probe_failures == 0 {
            return invalid("max_probe_failures must be greater than zero");
        }
        if self.max_strategy_attempts == 0 {
            return invalid("max_strategy_attempts must be greater than zero");
        }
        if self.journal_capacity == 0 {
            return invalid("journal_capacity must be greater than zero");
        }
        Ok(())
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 30,
            memory_threshold_mb: 512,
            leak_thresholds: LeakThresholds::default(),
            error_ceiling: 10,
            probe_timeout_ms: 5_000,
            max_probe_failures: 3,
            max_strategy_attempts: 3,
            strategy_backoff_ms: 1_000,
            dead_letter_alert_threshold: 50,
            journal_capacity: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecoveryError {
    #[error("Recovery exhausted ({reason}): {last_error}")]
    Exhausted { reason: String, last_error: String },

    #[error("Recovery action {strategy} failed: {message}")]
    ActionFailed {
        strategy: StrategyKind,
        message: String,
    },

    #[error("Invalid recovery configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

/// Affordance offered to whoever receives an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertAction {
    ManualRestart,
}

/// Condition surfaced to a human through the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,
    pub raised_at: DateTime<Utc>,
    pub action: Option<AlertAction>,
}

impl Alert {
    pub fn new(level: AlertLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            raised_at: Utc::now(),
            action: None,
        }
    }

    pub fn with_action(mut self, action: AlertAction) -> Self {
        self.action = Some(action);
        self
    }
}

/// What a remediation request led to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Remediated(StrategyKind),
    /// Another recovery was already running, or the controller gave up
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStatus {
    pub monitoring: bool,
    pub in_progress: bool,
    pub irrecoverable: bool,
    pub consecutive_probe_failures: u32,
    pub accumulated_errors: usize,
    pub last_strategy: Option<StrategyKind>,
    pub alerts: usize,
}
