use crate::task::types::QueueStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Thresholds used to judge queue health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Unhealthy when failed/total exceeds this ratio
    pub max_failure_ratio: f64,
    /// Unhealthy when tasks are in flight and nothing succeeded for this long
    pub stall_timeout_secs: u64,
    /// Unhealthy when the dead-letter set grows beyond this
    pub max_dead_letters: usize,
    /// Unhealthy when the rolling score is at or below this
    pub min_health_score: u8,
    /// Number of most recent outcomes the rolling score covers
    pub score_window: usize,
    /// Smoothing factor of the processing-time moving average
    pub processing_time_alpha: f64,
}

impl HealthConfig {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_failure_ratio: 0.3,
            stall_timeout_secs: 60,
            max_dead_letters: 100,
            min_health_score: 50,
            score_window: 100,
            processing_time_alpha: 0.2,
        }
    }
}

/// Health counters at a point in time; never persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub success_count: u64,
    pub failure_count: u64,
    pub last_successful_process_time: Option<DateTime<Utc>>,
    pub rolling_health_score: u8,
    pub average_processing_ms: f64,
}

/// Why a health check failed
#[derive(Debug, Clone, PartialEq)]
pub enum HealthIssue {
    FailureRatio { ratio: f64 },
    Stalled { since: Duration },
    DeadLetterBacklog { count: usize },
    LowScore { score: u8 },
}

impl std::fmt::Display for HealthIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthIssue::FailureRatio { ratio } => write!(f, "failure ratio {:.2}", ratio),
            HealthIssue::Stalled { since } => {
                write!(f, "no successful task for {}s", since.as_secs())
            }
            HealthIssue::DeadLetterBacklog { count } => {
                write!(f, "{} dead-lettered tasks", count)
            }
            HealthIssue::LowScore { score } => write!(f, "health score {}", score),
        }
    }
}

struct HealthState {
    success_count: u64,
    failure_count: u64,
    recent: VecDeque<bool>,
    last_success: Option<(Instant, DateTime<Utc>)>,
    baseline: Instant,
    average_processing_ms: Option<f64>,
}

impl HealthState {
    fn new() -> Self {
        Self {
            success_count: 0,
            failure_count: 0,
            recent: VecDeque::new(),
            last_success: None,
            baseline: Instant::now(),
            average_processing_ms: None,
        }
    }

    fn score(&self) -> u8 {
        if self.recent.is_empty() {
            return 100;
        }
        let successes = self.recent.iter().filter(|ok| **ok).count();
        (100.0 * successes as f64 / self.recent.len() as f64).round() as u8
    }
}

/// Rolling health score over recent task outcomes.
///
/// The score is the success percentage of the last `score_window` outcomes,
/// so old failures age out instead of weighing on the score forever.
pub struct HealthMonitor {
    config: HealthConfig,
    state: Mutex<HealthState>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HealthState::new()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, HealthState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Record one task outcome and its processing time
    pub fn update_score(&self, success: bool, processing_time: Duration) {
        let mut state = self.state();

        if success {
            state.success_count += 1;
            state.last_success = Some((Instant::now(), Utc::now()));
        } else {
            state.failure_count += 1;
        }

        state.recent.push_back(success);
        while state.recent.len() > self.config.score_window.max(1) {
            state.recent.pop_front();
        }

        let sample = processing_time.as_secs_f64() * 1000.0;
        let alpha = self.config.processing_time_alpha.clamp(0.0, 1.0);
        state.average_processing_ms = Some(match state.average_processing_ms {
            Some(average) => alpha * sample + (1.0 - alpha) * average,
            None => sample,
        });
    }

    pub fn score(&self) -> u8 {
        self.state().score()
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let state = self.state();
        HealthSnapshot {
            success_count: state.success_count,
            failure_count: state.failure_count,
            last_successful_process_time: state.last_success.map(|(_, at)| at),
            rolling_health_score: state.score(),
            average_processing_ms: state.average_processing_ms.unwrap_or(0.0),
        }
    }

    /// Every failed check for the given queue statistics
    pub fn assess(&self, stats: &QueueStats) -> Vec<HealthIssue> {
        let state = self.state();
        let mut issues = Vec::new();

        let ratio = stats.failure_ratio();
        if ratio > self.config.max_failure_ratio {
            issues.push(HealthIssue::FailureRatio { ratio });
        }

        if stats.processing > 0 {
            let since = state
                .last_success
                .map(|(at, _)| at)
                .unwrap_or(state.baseline)
                .elapsed();
            if since > self.config.stall_timeout() {
                issues.push(HealthIssue::Stalled { since });
            }
        }

        if stats.dead_lettered > self.config.max_dead_letters {
            issues.push(HealthIssue::DeadLetterBacklog {
                count: stats.dead_lettered,
            });
        }

        let score = state.score();
        if score <= self.config.min_health_score {
            issues.push(HealthIssue::LowScore { score });
        }

        if !issues.is_empty() {
            debug!("Health issues: {:?}", issues);
        }
        issues
    }

    pub fn is_healthy(&self, stats: &QueueStats) -> bool {
        self.assess(stats).is_empty()
    }

    /// Forget all recorded outcomes
    pub fn reset(&self) {
        *self.state() = HealthState::new();
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}
