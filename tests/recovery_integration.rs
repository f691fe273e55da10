use async_trait::async_trait;
use bulwark::recovery::{AlertAction, AlertLevel};
use bulwark::{Engine, EngineConfig, RecoveryHost, SessionState, StrategyKind, TaskHandler};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Host that counts session cycles and can be made unresponsive
#[derive(Default)]
struct CountingHost {
    unresponsive: AtomicBool,
    refuses_restart: AtomicBool,
    stops: AtomicUsize,
    starts: AtomicUsize,
    applied: Mutex<Vec<SessionState>>,
}

#[async_trait]
impl RecoveryHost for CountingHost {
    async fn probe(&self) -> anyhow::Result<()> {
        if self.unresponsive.load(Ordering::SeqCst) {
            // Longer than the probe timeout.
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        Ok(())
    }

    async fn stop_session(&self) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.refuses_restart.load(Ordering::SeqCst) {
            anyhow::bail!("session wedged");
        }
        Ok(())
    }

    async fn start_session(&self) -> anyhow::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn force_restart(&self) -> anyhow::Result<()> {
        anyhow::bail!("no supervisor available")
    }

    async fn capture_state(&self) -> SessionState {
        let mut state = SessionState::new();
        state.insert("inflight".to_string(), json!(["a", "b"]));
        state
    }

    async fn apply_state(&self, state: SessionState) -> anyhow::Result<()> {
        self.applied.lock().unwrap().push(state);
        Ok(())
    }

    fn memory_usage(&self) -> Option<u64> {
        None
    }
}

struct ConnectionReset;

#[async_trait]
impl TaskHandler for ConnectionReset {
    async fn execute(&self, _payload: Value) -> anyhow::Result<Value> {
        anyhow::bail!("upstream closed: connection reset by peer")
    }
}

struct Echo;

#[async_trait]
impl TaskHandler for Echo {
    async fn execute(&self, payload: Value) -> anyhow::Result<Value> {
        Ok(payload)
    }
}

struct Hanging;

#[async_trait]
impl TaskHandler for Hanging {
    async fn execute(&self, payload: Value) -> anyhow::Result<Value> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(payload)
    }
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.queue.max_retries = 1;
    config.queue.inter_batch_pause_ms = 1;
    config.recovery.sample_interval_secs = 1;
    config.recovery.probe_timeout_ms = 50;
    config.recovery.max_probe_failures = 1;
    config.recovery.max_strategy_attempts = 1;
    config.recovery.strategy_backoff_ms = 1;
    config
}

async fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn test_network_failures_restart_session() {
    let host = Arc::new(CountingHost::default());
    let engine = Engine::new(config(), Arc::new(ConnectionReset), host.clone())
        .await
        .unwrap();

    for i in 0..8 {
        engine.enqueue(json!(i)).await.unwrap();
    }

    assert!(eventually(Duration::from_secs(3), || host.starts.load(Ordering::SeqCst) >= 1).await);
    let status = engine.status().await;
    assert_eq!(status.recovery.last_strategy, Some(StrategyKind::Restart));
    assert!(!status.recovery.irrecoverable);
    assert!(!engine.queue().is_paused());
}

#[tokio::test]
async fn test_unresponsive_host_triggers_full_recovery() {
    let host = Arc::new(CountingHost::default());
    host.unresponsive.store(true, Ordering::SeqCst);
    let engine = Engine::new(config(), Arc::new(Echo), host.clone())
        .await
        .unwrap();
    assert!(engine.start_monitoring());

    assert!(eventually(Duration::from_secs(4), || !host.applied.lock().unwrap().is_empty()).await);
    host.unresponsive.store(false, Ordering::SeqCst);

    assert_eq!(host.stops.load(Ordering::SeqCst), 1);
    assert_eq!(host.starts.load(Ordering::SeqCst), 1);
    assert_eq!(
        host.applied.lock().unwrap()[0].get("inflight"),
        Some(&json!(["a", "b"]))
    );
    assert!(engine.status().await.recovery.monitoring);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_wedged_host_requires_manual_restart() {
    let host = Arc::new(CountingHost::default());
    host.unresponsive.store(true, Ordering::SeqCst);
    host.refuses_restart.store(true, Ordering::SeqCst);
    let engine = Engine::new(config(), Arc::new(Echo), host.clone())
        .await
        .unwrap();
    assert!(engine.start_monitoring());

    let controller = engine.controller().clone();
    assert!(eventually(Duration::from_secs(4), || controller.is_irrecoverable()).await);

    let status = engine.status().await;
    assert!(!status.is_healthy);
    assert!(!status.recovery.monitoring);
    assert!(engine.queue().is_paused());

    let alert = controller.alerts().pop().unwrap();
    assert_eq!(alert.level, AlertLevel::Critical);
    assert_eq!(alert.action, Some(AlertAction::ManualRestart));
    assert!(alert.message.contains("no supervisor available"));

    // Acknowledging the manual restart lets monitoring resume.
    host.unresponsive.store(false, Ordering::SeqCst);
    controller.clear_irrecoverable();
    assert!(engine.start_monitoring());
    engine.resume();
    let task_id = engine.enqueue(json!("after restart")).await.unwrap();
    for _ in 0..200 {
        if engine.stats().await.completed == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let task = engine.get_task(task_id).await.unwrap();
    assert_eq!(task.output, Some(json!("after restart")));
    assert!(engine.status().await.recovery.monitoring);
}

#[tokio::test]
async fn test_stalled_queue_restarts_session() {
    let mut config = config();
    config.health.stall_timeout_secs = 1;
    let host = Arc::new(CountingHost::default());
    let engine = Engine::new(config, Arc::new(Hanging), host.clone())
        .await
        .unwrap();
    assert!(engine.start_monitoring());

    engine.enqueue(json!("stuck")).await.unwrap();

    let controller = engine.controller().clone();
    assert!(
        eventually(Duration::from_secs(5), || {
            controller.status().last_strategy == Some(StrategyKind::Restart)
        })
        .await
    );
    assert!(host.starts.load(Ordering::SeqCst) >= 1);
    assert!(!engine.queue().is_paused());

    engine.shutdown().await.unwrap();
}
