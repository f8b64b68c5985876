//! Tests for the model lock and background task draining.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::sleep;

use super::*;

fn record(log: &Mutex<Vec<String>>, entry: String) {
    log.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
}

#[tokio::test(start_paused = true)]
async fn critical_sections_never_overlap() {
    let lock = ModelLock::new("test-model");
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for name in ["a", "b", "c"] {
        let task_lock = lock.clone();
        let task_log = Arc::clone(&log);
        handles.push(tokio::spawn(async move {
            let _guard = task_lock.acquire(name).await;
            record(&task_log, format!("enter {name}"));
            sleep(Duration::from_secs(1)).await;
            record(&task_log, format!("exit {name}"));
        }));
    }
    for handle in handles {
        handle
            .await
            .unwrap_or_else(|err| panic!("task panicked: {err}"));
    }

    let entries = log.lock().unwrap_or_else(PoisonError::into_inner).clone();
    assert_eq!(entries.len(), 6);
    for pair in entries.chunks(2) {
        let [enter, exit] = pair else {
            panic!("unbalanced log: {entries:?}");
        };
        let holder = enter.trim_start_matches("enter ");
        assert_eq!(exit, &format!("exit {holder}"), "log: {entries:?}");
    }
}

#[test]
fn global_lock_is_shared() {
    let first = ModelLock::global();
    let second = ModelLock::global();

    assert!(Arc::ptr_eq(&first.inner, &second.inner));
    assert_eq!(first.name(), MODEL_LOCK_NAME);
}

#[tokio::test(start_paused = true)]
async fn drain_waits_for_tasks_spawned_while_draining() {
    let tasks = Arc::new(BackgroundTasks::new());
    let finished = Arc::new(AtomicUsize::new(0));

    for delay in [1_u64, 3, 2] {
        let counter = Arc::clone(&finished);
        let spawner = Arc::clone(&tasks);
        tasks.spawn(format!("job-{delay}"), async move {
            sleep(Duration::from_secs(delay)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            if delay == 3 {
                let late = Arc::clone(&counter);
                spawner.spawn(String::from("late"), async move {
                    sleep(Duration::from_secs(1)).await;
                    late.fetch_add(1, Ordering::SeqCst);
                });
            }
        });
    }

    tasks.drain().await;

    assert_eq!(finished.load(Ordering::SeqCst), 4);
    assert_eq!(tasks.in_flight(), 0);
}
