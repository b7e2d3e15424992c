use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskId, TaskPriority, WorkerId};

/// Lifecycle notifications emitted by the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    TaskEnqueued {
        task_id: TaskId,
        task_type: String,
        priority: TaskPriority,
        at: DateTime<Utc>,
    },

    TaskDequeued {
        task_id: TaskId,
        worker_id: Option<WorkerId>,
        at: DateTime<Utc>,
    },

    TaskCompleted {
        task_id: TaskId,
        duration_ms: Option<i64>,
        at: DateTime<Utc>,
    },

    /// Failed but will be re-inserted once `delay_ms` elapses
    TaskRetrying {
        task_id: TaskId,
        retry_count: u32,
        delay_ms: u64,
        error: String,
        at: DateTime<Utc>,
    },

    /// Failed terminally
    TaskFailed {
        task_id: TaskId,
        error: String,
        dead_lettered: bool,
        at: DateTime<Utc>,
    },

    TaskCancelled {
        task_id: TaskId,
        at: DateTime<Utc>,
    },

    TaskTimedOut {
        task_id: TaskId,
        at: DateTime<Utc>,
    },

    /// Claimed by a stale worker past the visibility timeout and handed back
    TaskReclaimed {
        task_id: TaskId,
        worker_id: Option<WorkerId>,
        at: DateTime<Utc>,
    },

    /// Manually moved out of the dead-letter queue
    TaskRequeued {
        task_id: TaskId,
        at: DateTime<Utc>,
    },

    WorkerRegistered {
        worker_id: WorkerId,
        at: DateTime<Utc>,
    },

    WorkerUnregistered {
        worker_id: WorkerId,
        at: DateTime<Utc>,
    },
}

impl QueueEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::TaskEnqueued { .. } => "task_enqueued",
            Self::TaskDequeued { .. } => "task_dequeued",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskRetrying { .. } => "task_retrying",
            Self::TaskFailed { .. } => "task_failed",
            Self::TaskCancelled { .. } => "task_cancelled",
            Self::TaskTimedOut { .. } => "task_timed_out",
            Self::TaskReclaimed { .. } => "task_reclaimed",
            Self::TaskRequeued { .. } => "task_requeued",
            Self::WorkerRegistered { .. } => "worker_registered",
            Self::WorkerUnregistered { .. } => "worker_unregistered",
        }
    }

    /// Get the task ID, for task events
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::TaskEnqueued { task_id, .. }
            | Self::TaskDequeued { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskRetrying { task_id, .. }
            | Self::TaskFailed { task_id, .. }
            | Self::TaskCancelled { task_id, .. }
            | Self::TaskTimedOut { task_id, .. }
            | Self::TaskReclaimed { task_id, .. }
            | Self::TaskRequeued { task_id, .. } => Some(task_id),
            Self::WorkerRegistered { .. } | Self::WorkerUnregistered { .. } => None,
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::TaskEnqueued { at, .. }
            | Self::TaskDequeued { at, .. }
            | Self::TaskCompleted { at, .. }
            | Self::TaskRetrying { at, .. }
            | Self::TaskFailed { at, .. }
            | Self::TaskCancelled { at, .. }
            | Self::TaskTimedOut { at, .. }
            | Self::TaskReclaimed { at, .. }
            | Self::TaskRequeued { at, .. }
            | Self::WorkerRegistered { at, .. }
            | Self::WorkerUnregistered { at, .. } => at,
        }
    }
}
