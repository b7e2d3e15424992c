use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::TaskPriority;

/// Point-in-time queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,

    /// Length of the dead-letter queue
    pub dead_letter: usize,

    /// Pending tasks per priority
    pub by_priority: BTreeMap<TaskPriority, usize>,

    /// Registered workers accepting each task type
    pub by_worker_type: BTreeMap<String, usize>,
}

impl QueueStats {
    /// Tasks that still need work done
    pub fn outstanding(&self) -> usize {
        self.pending + self.processing
    }
}
