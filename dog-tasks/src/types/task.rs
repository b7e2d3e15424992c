use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{TaskId, TaskPriority, WorkerId};

/// Task status lifecycle
///
/// `pending -> processing -> {completed | failed -> (pending | dead-letter) | timeout | cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting in the priority index (possibly for a retry delay to elapse)
    Pending,

    /// Claimed by a worker
    Processing,

    /// Finished successfully
    Completed,

    /// Retries exhausted or failed permanently
    Failed,

    /// Exceeded its timeout while processing
    Timeout,

    /// Cancelled before it was picked up
    Cancelled,
}

impl TaskStatus {
    /// Check if the task is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }

    /// Get the status name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Task record - the queue's single source of truth for a unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    /// Determines which index the task lives in
    pub task_type: String,

    pub priority: TaskPriority,

    /// Opaque to the queue
    pub payload: Value,

    pub status: TaskStatus,

    pub created_at: DateTime<Utc>,

    /// Set when the task is dequeued, cleared when it goes back to pending
    pub started_at: Option<DateTime<Utc>>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Worker currently (or most recently) processing the task
    pub worker_id: Option<WorkerId>,

    pub retry_count: u32,

    pub max_retries: u32,

    /// Advisory; handed to handlers, not enforced by the queue
    pub timeout_ms: u64,

    pub last_error: Option<String>,

    /// Set only on completion
    pub result: Option<Value>,
}

impl Task {
    /// Create a new pending task
    pub fn new(
        task_type: impl Into<String>,
        payload: Value,
        options: &EnqueueOptions,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            task_type: task_type.into(),
            priority: options.priority,
            payload,
            status: TaskStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            worker_id: None,
            retry_count: 0,
            max_retries: options.max_retries.unwrap_or(0),
            timeout_ms: options
                .timeout
                .map(|t| t.as_millis() as u64)
                .unwrap_or_default(),
            last_error: None,
            result: None,
        }
    }

    /// Check if another retryable failure would be retried
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries && !self.status.is_terminal()
    }

    /// Advisory execution timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Time spent processing, once both ends are stamped
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Claim for processing
    pub fn start_processing(&mut self, worker_id: Option<WorkerId>, now: DateTime<Utc>) {
        self.status = TaskStatus::Processing;
        self.started_at = Some(now);
        self.worker_id = worker_id;
    }

    /// Complete the task successfully
    pub fn complete(&mut self, result: Value, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now);
        self.result = Some(result);
    }

    /// Back to pending for another attempt
    pub fn schedule_retry(&mut self, error: String) {
        self.retry_count += 1;
        self.status = TaskStatus::Pending;
        self.started_at = None;
        self.worker_id = None;
        self.last_error = Some(error);
    }

    /// Fail the task permanently
    pub fn fail(&mut self, error: String, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.completed_at = Some(now);
        self.last_error = Some(error);
    }

    pub fn time_out(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Timeout;
        self.completed_at = Some(now);
        self.last_error = Some(format!("Timed out after {}ms", self.timeout_ms));
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(now);
    }

    /// Reset a dead-lettered task for a fresh set of attempts
    pub fn requeue(&mut self) {
        self.status = TaskStatus::Pending;
        self.retry_count = 0;
        self.started_at = None;
        self.completed_at = None;
        self.worker_id = None;
    }
}

/// Per-task enqueue options; unset fields fall back to the queue config
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: TaskPriority,
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the task priority
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the maximum retry attempts
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the advisory execution timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options() -> EnqueueOptions {
        EnqueueOptions::new()
            .with_max_retries(2)
            .with_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_retry_resets_processing_fields() {
        let now = Utc::now();
        let mut task = Task::new("build", json!({"repo": "dogrs"}), &options(), now);
        task.start_processing(Some(WorkerId::from("w1")), now);

        task.schedule_retry("boom".to_string());

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
        assert!(task.started_at.is_none());
        assert!(task.worker_id.is_none());
        assert_eq!(task.last_error.as_deref(), Some("boom"));
        assert!(task.can_retry());
    }

    #[test]
    fn test_duration_requires_start_and_end() {
        let now = Utc::now();
        let mut task = Task::new("build", Value::Null, &options(), now);
        assert!(task.duration().is_none());

        task.start_processing(None, now);
        task.complete(json!("ok"), now + chrono::Duration::milliseconds(250));

        assert_eq!(task.duration().unwrap().num_milliseconds(), 250);
        assert!(task.status.is_terminal());
        assert_eq!(task.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TaskStatus::Cancelled).unwrap(), "\"cancelled\"");
    }
}
