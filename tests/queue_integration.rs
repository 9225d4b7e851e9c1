//! Integration tests for the task queue.
//!
//! These tests run `TaskQueue` against a real on-disk SQLite database,
//! including reopening the file to stand in for a process restart.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use mediafetch_core::queue::{Completion, NewTask, QueueError, TaskKind, TaskQueue, TaskStatus};
use mediafetch_core::{Database, TaskId};
use tempfile::TempDir;

/// Helper to create a test database with migrations applied.
async fn setup_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db = open(&temp_dir.path().join("test.db")).await;
    (db, temp_dir)
}

async fn open(path: &Path) -> Database {
    Database::new(path).await.expect("Failed to create database")
}

fn video(url: &str) -> NewTask {
    NewTask::new(url, TaskKind::Video)
}

async fn drain(queue: &TaskQueue) -> Vec<TaskId> {
    let mut order = Vec::new();
    while let Some(task) = queue.dequeue(Duration::ZERO).await.expect("dequeue") {
        order.push(task.id);
    }
    order
}

// ==================== Ordering ====================

#[tokio::test]
async fn test_priority_scenario_dequeues_url2_url1_url3() {
    let (db, _temp_dir) = setup_test_db().await;
    let queue = TaskQueue::new(db);

    let url1 = queue.submit(video("https://example.com/video/1")).await.unwrap();
    let url2 = queue
        .submit(video("https://example.com/video/2").priority(5))
        .await
        .unwrap();
    let url3 = queue.submit(video("https://example.com/video/3")).await.unwrap();

    assert_eq!(drain(&queue).await, vec![url2, url1, url3]);
}

#[tokio::test]
async fn test_positive_priorities_precede_default_tier() {
    let (db, _temp_dir) = setup_test_db().await;
    let queue = TaskQueue::new(db);

    let mut defaults = Vec::new();
    let mut boosted = Vec::new();
    for i in 0..6 {
        if i % 2 == 0 {
            defaults.push(queue.submit(video(&format!("https://example.com/d/{i}"))).await.unwrap());
        } else {
            boosted.push(
                queue
                    .submit(video(&format!("https://example.com/b/{i}")).priority(1))
                    .await
                    .unwrap(),
            );
        }
    }

    let order = drain(&queue).await;
    let expected: Vec<TaskId> = boosted.into_iter().chain(defaults).collect();
    assert_eq!(order, expected);
}

#[tokio::test]
async fn test_fifo_order_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("queue.db");

    let ids = {
        let db = open(&path).await;
        let queue = TaskQueue::new(db.clone());
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(queue.submit(video(&format!("https://example.com/{i}"))).await.unwrap());
        }
        db.close().await;
        ids
    };

    let queue = TaskQueue::new(open(&path).await);
    let report = queue.recover_on_startup().await.unwrap();
    assert_eq!(report.pending, 5);
    assert!(report.recovered.is_empty());
    assert_eq!(drain(&queue).await, ids);
}

// ==================== Crash Recovery ====================

#[tokio::test]
async fn test_crash_mid_processing_redelivers_same_task() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("queue.db");

    let id = {
        let db = open(&path).await;
        let queue = TaskQueue::new(db.clone());
        let id = queue.submit(video("https://example.com/video/crash")).await.unwrap();
        let task = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(task.status().unwrap(), TaskStatus::Processing);
        // Process dies here without completing.
        db.close().await;
        id
    };

    let queue = TaskQueue::new(open(&path).await);
    let report = queue.recover_on_startup().await.unwrap();
    assert_eq!(report.recovered, vec![id.clone()]);

    let task = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(task.id, id);
    assert_eq!(task.attempt_count, 0);
}

#[tokio::test]
async fn test_recovery_never_touches_finished_tasks() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("queue.db");

    let (done, failed) = {
        let db = open(&path).await;
        let queue = TaskQueue::new(db.clone());
        let done = queue.submit(video("https://example.com/a")).await.unwrap();
        let failed = queue.submit(video("https://example.com/b")).await.unwrap();
        queue.dequeue(Duration::ZERO).await.unwrap();
        queue
            .complete(&done, &Completion::succeeded(serde_json::json!({}), Duration::ZERO))
            .await
            .unwrap();
        queue.dequeue(Duration::ZERO).await.unwrap();
        queue.fail(&failed, "HTTP 404", 1).await.unwrap();
        db.close().await;
        (done, failed)
    };

    let queue = TaskQueue::new(open(&path).await);
    let report = queue.recover_on_startup().await.unwrap();
    assert!(report.recovered.is_empty());
    assert_eq!(report.pending, 0);
    assert_eq!(queue.status(&done).await.unwrap(), Some(TaskStatus::Completed));
    assert_eq!(queue.status(&failed).await.unwrap(), Some(TaskStatus::Failed));
}

// ==================== Concurrency ====================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dequeue_never_double_delivers() {
    let (db, _temp_dir) = setup_test_db().await;
    let queue = TaskQueue::new(db);
    for i in 0..40 {
        queue.submit(video(&format!("https://example.com/{i}"))).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..6 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(task) = queue.dequeue(Duration::from_millis(50)).await.unwrap() {
                claimed.push(task.id);
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let unique: HashSet<_> = all.iter().cloned().collect();
    assert_eq!(all.len(), 40);
    assert_eq!(unique.len(), 40);
    assert_eq!(queue.stats().await.unwrap().processing, 40);
}

// ==================== Validation ====================

#[tokio::test]
async fn test_validation_rejects_bad_input() {
    let (db, _temp_dir) = setup_test_db().await;
    let queue = TaskQueue::new(db);

    for bad in [
        video(""),
        video("ftp://example.com/file"),
        video("https://example.com/x").priority(2_000_000),
        video("https://example.com/x").max_attempts(0),
    ] {
        let err = queue.submit(bad).await.unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)), "got {err:?}");
    }
    assert_eq!(queue.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_attempt_count_never_exceeds_ceiling_outside_failed() {
    let (db, _temp_dir) = setup_test_db().await;
    let queue = TaskQueue::new(db);
    let id = queue
        .submit(video("https://example.com/x").max_attempts(3))
        .await
        .unwrap();

    for _ in 0..5 {
        if queue.dequeue(Duration::ZERO).await.unwrap().is_none() {
            break;
        }
        queue.requeue(&id, "HTTP 503").await.unwrap();
        let task = queue.get(&id).await.unwrap().unwrap();
        if task.status().unwrap() != TaskStatus::Failed {
            assert!(task.attempt_count < task.max_attempts);
        }
    }

    let task = queue.get(&id).await.unwrap().unwrap();
    assert_eq!(task.status().unwrap(), TaskStatus::Failed);
    assert_eq!(task.attempt_count, 3);
}
