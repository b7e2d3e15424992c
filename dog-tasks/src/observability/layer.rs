use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::debug;

use super::QueueMetrics;
use crate::QueueEvent;

/// Event fan-out plus counters, fed from every queue state change
#[derive(Clone)]
pub struct ObservabilityLayer {
    event_broadcaster: broadcast::Sender<QueueEvent>,
    metrics: Arc<QueueMetrics>,
}

impl ObservabilityLayer {
    pub fn new(capacity: usize) -> Self {
        let (event_broadcaster, _) = broadcast::channel(capacity.max(1));

        Self {
            event_broadcaster,
            metrics: Arc::new(QueueMetrics::new()),
        }
    }

    /// Count the event and deliver it to subscribers (none is fine)
    pub fn record(&self, event: QueueEvent) {
        match &event {
            QueueEvent::TaskEnqueued { .. } => self.metrics.increment_enqueued(),
            QueueEvent::TaskDequeued { .. } => self.metrics.increment_dequeued(),
            QueueEvent::TaskCompleted { .. } => self.metrics.increment_completed(),
            QueueEvent::TaskRetrying { .. } => self.metrics.increment_retried(),
            QueueEvent::TaskFailed { dead_lettered, .. } => self.metrics.increment_failed(*dead_lettered),
            QueueEvent::TaskCancelled { .. } => self.metrics.increment_cancelled(),
            QueueEvent::TaskTimedOut { .. } => self.metrics.increment_timed_out(),
            QueueEvent::TaskReclaimed { .. } => self.metrics.increment_reclaimed(),
            QueueEvent::TaskRequeued { .. }
            | QueueEvent::WorkerRegistered { .. }
            | QueueEvent::WorkerUnregistered { .. } => {}
        }

        debug!(event = event.event_name(), "Recorded queue event");
        let _ = self.event_broadcaster.send(event);
    }

    pub fn record_execution_time(&self, task_type: &str, duration: Duration) {
        self.metrics.record_execution_time(task_type, duration);
    }

    /// Subscribe to subsequent events
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.event_broadcaster.subscribe()
    }

    pub fn metrics(&self) -> &QueueMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskId;
    use chrono::Utc;

    #[tokio::test]
    async fn test_record_counts_and_broadcasts() {
        let layer = ObservabilityLayer::new(16);
        let mut rx = layer.subscribe();

        layer.record(QueueEvent::TaskCancelled {
            task_id: TaskId::from("t1"),
            at: Utc::now(),
        });

        assert_eq!(rx.recv().await.unwrap().event_name(), "task_cancelled");
        assert_eq!(layer.metrics().snapshot().tasks_cancelled, 1);
    }

    #[test]
    fn test_record_without_subscribers() {
        let layer = ObservabilityLayer::new(4);
        layer.record(QueueEvent::TaskRequeued {
            task_id: TaskId::from("t1"),
            at: Utc::now(),
        });
        assert_eq!(layer.metrics().snapshot().tasks_enqueued, 0);
    }
}
