use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::WorkerId;

/// Registration metadata for a worker process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub worker_id: WorkerId,

    /// Task types this worker accepts (never empty)
    pub task_types: BTreeSet<String>,

    /// Concurrency ceiling enforced by the worker's dispatcher
    pub max_concurrent: usize,

    /// In-flight count as of the last heartbeat
    pub current_in_flight: usize,

    pub last_heartbeat: DateTime<Utc>,

    pub registered_at: DateTime<Utc>,

    pub hostname: Option<String>,

    pub container_id: Option<String>,
}

impl WorkerRegistration {
    pub fn new(
        worker_id: WorkerId,
        task_types: BTreeSet<String>,
        options: &WorkerOptions,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            worker_id,
            task_types,
            max_concurrent: options.max_concurrent,
            current_in_flight: 0,
            last_heartbeat: now,
            registered_at: now,
            hostname: options.hostname.clone(),
            container_id: options.container_id.clone(),
        }
    }

    pub fn accepts(&self, task_type: &str) -> bool {
        self.task_types.contains(task_type)
    }

    /// No heartbeat within `stale_after` of `now`
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: std::time::Duration) -> bool {
        chrono::Duration::from_std(stale_after)
            .ok()
            .and_then(|stale_after| self.last_heartbeat.checked_add_signed(stale_after))
            .is_some_and(|deadline| deadline < now)
    }
}

/// Options for registering a worker
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub worker_id: Option<WorkerId>,
    pub max_concurrent: usize,
    pub hostname: Option<String>,
    pub container_id: Option<String>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            worker_id: None,
            max_concurrent: 1,
            hostname: std::env::var("HOSTNAME").ok(),
            container_id: None,
        }
    }
}

impl WorkerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed worker id instead of generating one
    pub fn with_worker_id(mut self, worker_id: impl Into<WorkerId>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_container_id(mut self, container_id: impl Into<String>) -> Self {
        self.container_id = Some(container_id.into());
        self
    }
}
