use async_trait::async_trait;
use bulwark::hooks::HookKind;
use bulwark::task::QueueStats;
use bulwark::{
    Engine, EngineConfig, Hook, HookOutcome, NoopHost, SessionState, TaskHandler, TaskStatus,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Fails payloads marked `"fail": true` until healed
struct MarkedFailures {
    healed: AtomicBool,
    calls: AtomicUsize,
}

impl MarkedFailures {
    fn new() -> Self {
        Self {
            healed: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TaskHandler for MarkedFailures {
    async fn execute(&self, payload: Value) -> anyhow::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if payload["fail"] == json!(true) && !self.healed.load(Ordering::SeqCst) {
            anyhow::bail!("payload rejected by downstream");
        }
        Ok(json!({ "echo": payload }))
    }
}

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.queue.max_retries = 2;
    config.queue.backoff_base_ms = 2;
    config.queue.max_backoff_delay_ms = 10;
    config.queue.inter_batch_pause_ms = 1;
    config.queue.per_task_timeout_ms = 2_000;
    config
}

async fn wait_for(engine: &Engine, done: impl Fn(&QueueStats) -> bool) -> QueueStats {
    for _ in 0..400 {
        let stats = engine.stats().await;
        if done(&stats) {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let stats = engine.stats().await;
    panic!("Queue never reached the expected state: {:?}", stats);
}

#[tokio::test]
async fn test_mixed_workload_completes_and_dead_letters() {
    let handler = Arc::new(MarkedFailures::new());
    let engine = Engine::new(fast_config(), handler.clone(), Arc::new(NoopHost))
        .await
        .unwrap();

    for i in 0..6 {
        engine.enqueue(json!({ "n": i, "fail": i % 3 == 0 })).await.unwrap();
    }

    let stats = wait_for(&engine, |s| s.active == 0).await;
    assert_eq!(stats.completed, 4);
    assert_eq!(stats.dead_lettered, 2);
    // Two attempts for each failing payload, one for the rest.
    assert_eq!(handler.calls.load(Ordering::SeqCst), 8);

    let dead = engine.dead_letters().await;
    assert!(dead.iter().all(|task| task.status == TaskStatus::Failed));
    assert!(dead.iter().all(|task| task.attempt_count == 2));
    assert!(
        dead[0]
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("payload rejected by downstream"))
    );

    handler.healed.store(true, Ordering::SeqCst);
    assert_eq!(engine.retry_dead_letter().await, 2);

    let stats = wait_for(&engine, |s| s.active == 0).await;
    assert_eq!(stats.completed, 6);
    assert_eq!(stats.dead_lettered, 0);
}

#[tokio::test]
async fn test_paused_engine_holds_tasks() {
    let engine = Engine::new(fast_config(), Arc::new(MarkedFailures::new()), Arc::new(NoopHost))
        .await
        .unwrap();

    engine.pause();
    let task_id = engine.enqueue(json!({ "n": 1 })).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(
        engine.get_task(task_id).await.map(|task| task.status),
        Some(TaskStatus::Pending)
    );

    engine.resume();
    wait_for(&engine, |s| s.completed == 1).await;
    let task = engine.get_task(task_id).await.unwrap();
    assert_eq!(task.output, Some(json!({ "echo": { "n": 1 } })));
}

#[tokio::test]
async fn test_hooks_shape_payload_and_observe_output() {
    let engine = Engine::new(fast_config(), Arc::new(MarkedFailures::new()), Arc::new(NoopHost))
        .await
        .unwrap();
    let observed = Arc::new(AtomicUsize::new(0));

    engine
        .register_hook(
            Hook::from_fn("tag", HookKind::Pre, |ctx| async move {
                let mut payload = ctx.content.clone();
                payload["tagged"] = json!(true);
                Ok(HookOutcome::modified(payload))
            }),
            Some("task.before"),
        )
        .await;
    let counter = observed.clone();
    engine
        .register_hook(
            Hook::from_fn("observe", HookKind::Post, move |ctx| {
                let counter = counter.clone();
                async move {
                    if ctx.content["echo"]["tagged"] == json!(true) {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(HookOutcome::success())
                }
            }),
            Some("task.after"),
        )
        .await;

    let task_id = engine.enqueue(json!({ "n": 1 })).await.unwrap();
    wait_for(&engine, |s| s.completed == 1).await;

    assert_eq!(observed.load(Ordering::SeqCst), 1);
    let task = engine.get_task(task_id).await.unwrap();
    assert_eq!(task.output, Some(json!({ "echo": { "n": 1, "tagged": true } })));
}

#[tokio::test]
async fn test_snapshot_survives_engine_restart() {
    let store = TempDir::new().unwrap();
    let mut config = fast_config();
    config.persistence.store_dir = Some(store.path().to_path_buf());

    let first = Engine::new(config.clone(), Arc::new(MarkedFailures::new()), Arc::new(NoopHost))
        .await
        .unwrap();
    let mut state = SessionState::new();
    state.insert("cursor".to_string(), json!(42));
    state.insert("owner".to_string(), json!("nightly-import"));
    assert!(first.save_state(&state).await);
    drop(first);

    let second = Engine::new(config, Arc::new(MarkedFailures::new()), Arc::new(NoopHost))
        .await
        .unwrap();
    assert_eq!(second.restore_state().await, Some(state));
}
