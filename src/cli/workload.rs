//! Simulated task handler and the `run` command driver

use crate::integration::Engine;
use crate::task::{QueueError, QueueStats, TaskHandler};
use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Handler that sleeps for a fixed latency and fails at random
#[derive(Debug, Clone)]
pub struct SimulatedHandler {
    failure_rate: f64,
    latency: Duration,
}

impl SimulatedHandler {
    pub fn new(failure_rate: f64, latency: Duration) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            latency,
        }
    }
}

#[async_trait]
impl TaskHandler for SimulatedHandler {
    async fn execute(&self, payload: Value) -> Result<Value> {
        sleep(self.latency).await;

        let failed = rand::rng().random_bool(self.failure_rate);
        if failed {
            anyhow::bail!("simulated failure for payload {}", payload);
        }
        Ok(json!({ "processed": payload }))
    }
}

/// Outcome of one `run` invocation
#[derive(Debug, Clone)]
pub struct WorkloadReport {
    pub submitted: usize,
    pub rejected: usize,
    pub stats: QueueStats,
    pub elapsed: Duration,
}

/// Enqueue every payload, waiting for capacity when the queue is full, then
/// wait until no task is pending or processing
pub async fn run_workload(
    engine: &Engine,
    payloads: Vec<Value>,
    poll_interval: Duration,
) -> WorkloadReport {
    let started = Instant::now();
    let mut submitted = 0;
    let mut rejected = 0;

    for payload in payloads {
        loop {
            match engine.enqueue(payload.clone()).await {
                Ok(task_id) => {
                    debug!("Enqueued task {}", task_id);
                    submitted += 1;
                    break;
                }
                Err(QueueError::QueueFull { .. }) if !engine.queue().is_paused() => {
                    sleep(poll_interval).await;
                }
                Err(e) => {
                    warn!("Payload rejected: {}", e);
                    rejected += 1;
                    break;
                }
            }
        }
    }

    loop {
        let stats = engine.stats().await;
        if stats.active == 0 || engine.controller().is_irrecoverable() {
            info!(
                "Workload finished: {} completed, {} dead-lettered",
                stats.completed, stats.dead_lettered
            );
            return WorkloadReport {
                submitted,
                rejected,
                stats,
                elapsed: started.elapsed(),
            };
        }
        sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::EngineConfig;
    use crate::recovery::NoopHost;
    use std::sync::Arc;

    fn fast_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.queue.max_queue_size = 4;
        config.queue.backoff_base_ms = 1;
        config.queue.max_backoff_delay_ms = 5;
        config.queue.inter_batch_pause_ms = 1;
        config
    }

    #[tokio::test]
    async fn test_always_failing_handler_dead_letters() {
        let handler = SimulatedHandler::new(1.0, Duration::ZERO);
        let result = handler.execute(json!(1)).await;
        assert!(result.unwrap_err().to_string().contains("simulated failure"));
    }

    #[tokio::test]
    async fn test_workload_waits_for_capacity() {
        let engine = Engine::new(
            fast_config(),
            Arc::new(SimulatedHandler::new(0.0, Duration::from_millis(1))),
            Arc::new(NoopHost),
        )
        .await
        .unwrap();

        let payloads = (0..10).map(|i| json!(i)).collect();
        let report = run_workload(&engine, payloads, Duration::from_millis(2)).await;

        assert_eq!(report.submitted, 10);
        assert_eq!(report.rejected, 0);
        assert_eq!(report.stats.completed, 10);
        assert_eq!(report.stats.active, 0);
    }
}
