use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_stream::StreamExt;

use dog_tasks::{
    BoxStream, EnqueueOptions, ManualClock, QueueConfig, QueueEvent, QueueService, TaskId,
    TaskPriority, TaskStatus, WorkerOptions,
};

/// Test factory functions
fn create_queue() -> (Arc<QueueService>, ManualClock) {
    let clock = ManualClock::default();
    let queue = QueueService::new(QueueConfig::default())
        .unwrap()
        .with_clock(Arc::new(clock.clone()));
    (Arc::new(queue), clock)
}

fn with_priority(priority: TaskPriority) -> EnqueueOptions {
    EnqueueOptions::new().with_priority(priority)
}

async fn receive_next_event(stream: &mut BoxStream<QueueEvent>) -> QueueEvent {
    tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("Timeout waiting for event")
        .expect("Stream ended")
}

/// A1. Higher priority first, FIFO among equals
#[tokio::test]
async fn test_priority_then_fifo() {
    let (queue, _) = create_queue();

    let low = queue.enqueue("email", json!("low"), with_priority(TaskPriority::Low)).await.unwrap();
    let critical = queue.enqueue("email", json!("critical"), with_priority(TaskPriority::Critical)).await.unwrap();
    let normal_a = queue.enqueue("email", json!("a"), with_priority(TaskPriority::Normal)).await.unwrap();
    let normal_b = queue.enqueue("email", json!("b"), with_priority(TaskPriority::Normal)).await.unwrap();

    let mut order = Vec::new();
    while let Some(task) = queue.dequeue(&["email"]).await.unwrap() {
        order.push(task.id);
    }

    assert_eq!(order, vec![critical, normal_a, normal_b, low]);
}

/// A2. Concurrent dequeuers never claim the same task
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dequeue_claims_atomically() {
    let (queue, _) = create_queue();

    let mut enqueued = HashSet::new();
    for n in 0..50 {
        enqueued.insert(queue.enqueue("resize", json!(n), EnqueueOptions::new()).await.unwrap());
    }

    let mut consumers = Vec::new();
    for _ in 0..8 {
        let queue = queue.clone();
        consumers.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(task) = queue.dequeue(&["resize"]).await.unwrap() {
                claimed.push(task.id);
            }
            claimed
        }));
    }

    let mut claimed: Vec<TaskId> = Vec::new();
    for consumer in consumers {
        claimed.extend(consumer.await.unwrap());
    }

    let unique: HashSet<TaskId> = claimed.iter().cloned().collect();
    assert_eq!(claimed.len(), 50);
    assert_eq!(unique, enqueued);
    assert_eq!(queue.get_stats().await.unwrap().processing, 50);
}

/// A3. Retries exhaust into the dead-letter queue
#[tokio::test]
async fn test_retry_exhaustion_dead_letters() {
    let (queue, clock) = create_queue();
    let id = queue
        .enqueue("charge", json!({"amount": 10}), EnqueueOptions::new().with_max_retries(2))
        .await
        .unwrap();

    for expected_retry_count in 1..=2 {
        let task = queue.dequeue(&["charge"]).await.unwrap().unwrap();
        assert_eq!(task.id, id);

        queue.fail(&id, "gateway timeout", true).await.unwrap();

        let task = queue.get_task(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, expected_retry_count);

        clock.advance(Duration::from_secs(30));
    }

    queue.dequeue(&["charge"]).await.unwrap().unwrap();
    queue.fail(&id, "gateway timeout", true).await.unwrap();

    let task = queue.get_task(&id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 2);

    let stats = queue.get_stats().await.unwrap();
    assert_eq!(stats.dead_letter, 1);
    assert_eq!(stats.pending, 0);
    assert!(queue.dequeue(&["charge"]).await.unwrap().is_none());
}

/// A4. Cancel wins only while pending
#[tokio::test]
async fn test_cancel_pending_only() {
    let (queue, _) = create_queue();
    let id = queue.enqueue("report", json!({}), EnqueueOptions::new()).await.unwrap();

    assert!(queue.cancel(&id).await.unwrap());
    assert!(!queue.cancel(&id).await.unwrap());
    assert!(queue.dequeue(&["report"]).await.unwrap().is_none());

    let task = queue.get_task(&id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);

    // Late acks don't resurrect it.
    queue.complete(&id, json!("late")).await.unwrap();
    assert_eq!(queue.get_task(&id).await.unwrap().unwrap().status, TaskStatus::Cancelled);
}

/// A5. Results expire while the record stays completed
#[tokio::test]
async fn test_result_ttl() {
    let clock = ManualClock::default();
    let queue = QueueService::new(QueueConfig::default().with_result_ttl(Duration::from_secs(1)))
        .unwrap()
        .with_clock(Arc::new(clock.clone()));

    let id = queue.enqueue("render", json!({}), EnqueueOptions::new()).await.unwrap();
    queue.dequeue(&["render"]).await.unwrap().unwrap();
    queue.complete(&id, json!({"frames": 24})).await.unwrap();

    assert_eq!(queue.get_result(&id).await.unwrap(), Some(json!({"frames": 24})));

    clock.advance(Duration::from_millis(1100));

    assert_eq!(queue.get_result(&id).await.unwrap(), None);
    let task = queue.get_task(&id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result, Some(json!({"frames": 24})));
}

/// A6. Event stream follows the task through retry and completion
#[tokio::test]
async fn test_event_stream_lifecycle() {
    let (queue, clock) = create_queue();
    let mut events = queue.event_stream();

    let worker = queue
        .register_worker(&["sync"], WorkerOptions::new().with_worker_id("w1"))
        .await
        .unwrap();
    let id = queue.enqueue("sync", json!({}), with_priority(TaskPriority::High)).await.unwrap();
    queue.dequeue_for(&worker, &["sync"]).await.unwrap().unwrap();
    queue.fail(&id, "conflict", true).await.unwrap();
    clock.advance(Duration::from_secs(5));
    queue.dequeue_for(&worker, &["sync"]).await.unwrap().unwrap();
    queue.complete(&id, json!("synced")).await.unwrap();
    queue.unregister_worker(&worker).await.unwrap();

    assert!(matches!(
        receive_next_event(&mut events).await,
        QueueEvent::WorkerRegistered { worker_id, .. } if worker_id == worker
    ));
    assert!(matches!(
        receive_next_event(&mut events).await,
        QueueEvent::TaskEnqueued { priority: TaskPriority::High, .. }
    ));
    assert!(matches!(
        receive_next_event(&mut events).await,
        QueueEvent::TaskDequeued { worker_id: Some(_), .. }
    ));
    assert!(matches!(
        receive_next_event(&mut events).await,
        QueueEvent::TaskRetrying { retry_count: 1, delay_ms: 2000, .. }
    ));
    assert!(matches!(
        receive_next_event(&mut events).await,
        QueueEvent::TaskDequeued { .. }
    ));
    let completed = receive_next_event(&mut events).await;
    assert_eq!(completed.task_id(), Some(&id));
    assert_eq!(completed.event_name(), "task_completed");
    assert_eq!(receive_next_event(&mut events).await.event_name(), "worker_unregistered");

    let metrics = queue.metrics();
    assert_eq!(metrics.tasks_dequeued, 2);
    assert_eq!(metrics.tasks_retried, 1);
    assert_eq!(metrics.tasks_completed, 1);
}

/// A7. Dead letters can be inspected and re-run
#[tokio::test]
async fn test_dead_letter_retry() {
    let (queue, _) = create_queue();
    let id = queue
        .enqueue("import", json!({"file": "a.csv"}), EnqueueOptions::new().with_max_retries(0))
        .await
        .unwrap();
    queue.dequeue(&["import"]).await.unwrap().unwrap();
    queue.fail(&id, "corrupt row", true).await.unwrap();

    let dead = queue.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].last_error.as_deref(), Some("corrupt row"));

    assert!(queue.retry_dead_letter(&id).await.unwrap());

    let task = queue.dequeue(&["import"]).await.unwrap().unwrap();
    assert_eq!(task.id, id);
    assert_eq!(task.status, TaskStatus::Processing);
    assert!(task.completed_at.is_none());
    assert_eq!(queue.get_stats().await.unwrap().dead_letter, 0);
}

/// A8. Stale index entries left by deletion are skipped
#[tokio::test]
async fn test_deleted_tasks_are_never_dequeued() {
    let (queue, _) = create_queue();
    let gone = queue.enqueue("index", json!(1), with_priority(TaskPriority::Critical)).await.unwrap();
    let kept = queue.enqueue("index", json!(2), EnqueueOptions::new()).await.unwrap();

    assert!(queue.delete_task(&gone).await.unwrap());

    assert_eq!(queue.dequeue(&["index"]).await.unwrap().unwrap().id, kept);
    assert!(queue.dequeue(&["index"]).await.unwrap().is_none());
}
