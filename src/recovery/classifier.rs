use crate::recovery::types::StrategyKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static MEMORY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)memory|heap|\boom\b|allocation failed").expect("valid memory pattern")
});

static NETWORK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)network|timeout|timed out|econnrefused|econnreset|connection (refused|reset|closed)|unreachable|socket",
    )
    .expect("valid network pattern")
});

static STATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)state|undefined|\bnull\b").expect("valid state pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Memory,
    Network,
    State,
    Other,
}

/// Error counts per category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub memory: usize,
    pub network: usize,
    pub state: usize,
    pub other: usize,
}

impl ErrorClassification {
    pub fn total(&self) -> usize {
        self.memory + self.network + self.state + self.other
    }
}

/// Buckets error messages by keyword and picks a recovery strategy
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    error_ceiling: usize,
}

impl ErrorClassifier {
    pub fn new(error_ceiling: usize) -> Self {
        Self { error_ceiling }
    }

    /// First matching category wins: memory, then network, then state
    pub fn categorize(&self, message: &str) -> ErrorCategory {
        if MEMORY_PATTERN.is_match(message) {
            ErrorCategory::Memory
        } else if NETWORK_PATTERN.is_match(message) {
            ErrorCategory::Network
        } else if STATE_PATTERN.is_match(message) {
            ErrorCategory::State
        } else {
            ErrorCategory::Other
        }
    }

    pub fn classify<S: AsRef<str>>(&self, messages: &[S]) -> ErrorClassification {
        let mut classification = ErrorClassification::default();
        for message in messages {
            match self.categorize(message.as_ref()) {
                ErrorCategory::Memory => classification.memory += 1,
                ErrorCategory::Network => classification.network += 1,
                ErrorCategory::State => classification.state += 1,
                ErrorCategory::Other => classification.other += 1,
            }
        }
        classification
    }

    pub fn strategy_for(&self, classification: &ErrorClassification) -> Option<StrategyKind> {
        if classification.memory > 3 {
            Some(StrategyKind::Cleanup)
        } else if classification.network > 5 {
            Some(StrategyKind::Restart)
        } else if classification.state > 2 {
            Some(StrategyKind::Reset)
        } else if classification.total() > self.error_ceiling {
            Some(StrategyKind::GracefulShutdown)
        } else {
            None
        }
    }

    /// Strategy warranted by the accumulated errors, if any
    pub fn determine_strategy<S: AsRef<str>>(&self, messages: &[S]) -> Option<StrategyKind> {
        self.strategy_for(&self.classify(messages))
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(10)
    }
}
