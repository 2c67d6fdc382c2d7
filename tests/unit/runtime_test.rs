//! Tests for runtime adapters

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use prometheus_gates::config::SchedulerConfig;
use prometheus_gates::{Scheduler, Spawn, TokioSpawner};

#[tokio::test]
async fn test_current_spawner_runs_future() {
    let spawner = TokioSpawner::current();
    let ran = Arc::new(AtomicBool::new(false));
    let (tx, rx) = tokio::sync::oneshot::channel();
    let flag = Arc::clone(&ran);
    spawner.spawn(async move {
        flag.store(true, Ordering::SeqCst);
        let _ = tx.send(());
    });
    rx.await.unwrap();
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn test_owned_runtime_drives_scheduler() {
    let spawner = TokioSpawner::with_worker_threads(2).unwrap();
    let handle = spawner.handle().clone();
    let scheduler = Scheduler::new(SchedulerConfig::new().with_max_concurrency(2), spawner).unwrap();

    let task = scheduler
        .submit(|| async { Ok::<_, anyhow::Error>("done") })
        .unwrap();
    let out = handle.block_on(task).unwrap();
    assert_eq!(out, "done");
}

#[tokio::test]
async fn test_owned_runtime_dropped_inside_async_context() {
    let spawner = TokioSpawner::with_worker_threads(2).unwrap();
    let scheduler = Scheduler::new(SchedulerConfig::new().with_max_concurrency(2), spawner).unwrap();

    let out = scheduler
        .submit(|| async { Ok::<_, anyhow::Error>(42) })
        .unwrap()
        .await
        .unwrap();
    assert_eq!(out, 42);

    // Last owner of the worker runtime goes away on an async thread.
    drop(scheduler);
}
