use super::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[tokio::test]
async fn test_timer_fires_and_untracks_itself() {
    let tracker = ResourceTracker::new();
    let fired = Arc::new(AtomicUsize::new(0));

    let counter = fired.clone();
    let id = tracker.schedule_once("retry", Duration::from_millis(10), async move {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(tracker.is_tracked(id));
    assert_eq!(tracker.counts().timers, 1);

    assert!(wait_until(|| fired.load(Ordering::SeqCst) == 1).await);
    assert!(!tracker.is_tracked(id));
    assert_eq!(tracker.counts().timers, 0);
}

#[tokio::test]
async fn test_zero_delay_timer_does_not_linger() {
    let tracker = ResourceTracker::new();
    let fired = Arc::new(AtomicUsize::new(0));

    let counter = fired.clone();
    tracker.schedule_once("immediate", Duration::ZERO, async move {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(wait_until(|| fired.load(Ordering::SeqCst) == 1).await);
    assert_eq!(tracker.counts().timers, 0);
}

#[tokio::test]
async fn test_cancelled_timer_never_fires() {
    let tracker = ResourceTracker::new();
    let fired = Arc::new(AtomicUsize::new(0));

    let counter = fired.clone();
    let id = tracker.schedule_once("retry", Duration::from_millis(30), async move {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(tracker.cancel(id));
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert!(!tracker.cancel(id));
}

#[tokio::test]
async fn test_repeating_timer_runs_until_cancelled() {
    let tracker = ResourceTracker::new();
    let ticks = Arc::new(AtomicUsize::new(0));

    let counter = ticks.clone();
    let id = tracker.schedule_repeating("sampler", Duration::from_millis(5), move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    assert_eq!(tracker.counts().repeating_timers, 1);
    assert!(wait_until(|| ticks.load(Ordering::SeqCst) >= 3).await);

    tracker.cancel(id);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let after_cancel = ticks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), after_cancel);
    assert_eq!(tracker.counts().repeating_timers, 0);
}

#[tokio::test]
async fn test_operation_untracks_on_completion() {
    let tracker = ResourceTracker::new();
    let (tx, rx) = tokio::sync::oneshot::channel::<u32>();

    let operation = tracker.track_operation("handler", async move { rx.await.unwrap_or(0) });
    let running = tokio::spawn(operation);

    assert!(wait_until(|| tracker.counts().operations == 1).await);
    tx.send(7).unwrap();
    assert_eq!(running.await.unwrap(), 7);
    assert_eq!(tracker.counts().operations, 0);
}

#[tokio::test]
async fn test_operation_untracks_when_dropped() {
    let tracker = ResourceTracker::new();
    let operation = tracker.track_operation("abandoned", std::future::pending::<()>());

    let result = tokio::time::timeout(Duration::from_millis(10), operation).await;
    assert!(result.is_err());
    assert_eq!(tracker.counts().operations, 0);
}

#[test]
fn test_disposable_runs_on_cancel() {
    let tracker = ResourceTracker::new();
    let disposed = Arc::new(AtomicUsize::new(0));

    let counter = disposed.clone();
    let id = tracker.register_disposable("watcher", move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(tracker.untrack(id));
    assert_eq!(disposed.load(Ordering::SeqCst), 0);

    let counter = disposed.clone();
    let id = tracker.register_disposable("watcher", move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(tracker.cancel(id));
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_leak_detection_by_count() {
    let tracker = ResourceTracker::new();
    let thresholds = LeakThresholds {
        max_timers: 2,
        max_repeating_timers: 10,
        max_operations: 50,
    };

    for _ in 0..3 {
        tracker.schedule_once("slow", Duration::from_secs(60), async {});
    }

    let leaks = tracker.detect_leaks(&thresholds);
    assert_eq!(leaks.len(), 1);
    assert_eq!(leaks[0].kind, ResourceKind::Timer);
    assert_eq!(leaks[0].count, 3);
    assert_eq!(leaks[0].threshold, 2);

    tracker.cleanup_leaked_resources();
    assert!(tracker.detect_leaks(&thresholds).is_empty());
}

#[tokio::test]
async fn test_cleanup_releases_every_category() {
    let tracker = ResourceTracker::new();
    let disposed = Arc::new(AtomicUsize::new(0));

    tracker.schedule_once("retry", Duration::from_secs(60), async {});
    tracker.schedule_repeating("sampler", Duration::from_secs(60), || async {});
    let _guard = tracker.begin_operation("handler");
    let counter = disposed.clone();
    tracker.register_disposable("watcher", move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(tracker.counts().total(), 4);

    let report = tracker.cleanup_leaked_resources();
    assert_eq!(
        report,
        CleanupReport {
            timers_cancelled: 1,
            repeating_timers_cancelled: 1,
            operations_released: 1,
            disposables_disposed: 1,
        }
    );
    assert_eq!(tracker.counts(), ResourceCounts::default());
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_track_external_task() {
    let tracker = ResourceTracker::new();
    let handle = tokio::spawn(std::future::pending::<()>());

    let id = tracker.track_task(ResourceKind::Timer, "external", handle.abort_handle());
    assert_eq!(tracker.resources()[0].label, "external");

    tracker.cancel(id);
    let joined = handle.await;
    assert!(joined.unwrap_err().is_cancelled());
}
