pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{QueueResult, Task, TaskId, TaskPriority, WorkerId, WorkerRegistration};

/// Record storage keyed by task id
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert or overwrite
    async fn put(&self, task: Task) -> QueueResult<()>;

    async fn get(&self, id: &TaskId) -> QueueResult<Option<Task>>;

    /// Returns whether a record was removed
    async fn delete(&self, id: &TaskId) -> QueueResult<bool>;

    /// Snapshot of all records (stats, sweeping)
    async fn list(&self) -> QueueResult<Vec<Task>>;
}

/// Entry in a priority index namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub task_id: TaskId,
    pub priority: TaskPriority,
    /// Not poppable before this instant (retry backoff); `None` is ready now
    pub ready_at: Option<DateTime<Utc>>,
}

impl IndexEntry {
    /// Entry that is immediately poppable
    pub fn new(task_id: TaskId, priority: TaskPriority) -> Self {
        Self {
            task_id,
            priority,
            ready_at: None,
        }
    }

    /// Entry held back until `ready_at`
    pub fn delayed(task_id: TaskId, priority: TaskPriority, ready_at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            priority,
            ready_at: Some(ready_at),
        }
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.ready_at.map_or(true, |at| at <= now)
    }
}

/// Ordered pending-task ids, one sequence per namespace key
#[async_trait]
pub trait PriorityIndex: Send + Sync {
    /// Insert before the first entry of strictly lower priority
    /// (higher priority first, FIFO among equals)
    async fn insert(&self, key: &str, entry: IndexEntry) -> QueueResult<()>;

    /// Append regardless of priority
    async fn push_back(&self, key: &str, entry: IndexEntry) -> QueueResult<()>;

    /// Remove and return the first entry that is ready at `now`
    async fn pop_ready(&self, key: &str, now: DateTime<Utc>) -> QueueResult<Option<TaskId>>;

    /// Returns whether an entry was removed
    async fn remove(&self, key: &str, id: &TaskId) -> QueueResult<bool>;

    /// Entries in dequeue order
    async fn entries(&self, key: &str) -> QueueResult<Vec<IndexEntry>>;

    async fn len(&self, key: &str) -> QueueResult<usize>;
}

/// Worker registrations keyed by worker id
#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// Insert or overwrite by id
    async fn register(&self, registration: WorkerRegistration) -> QueueResult<()>;

    /// Refresh heartbeat and in-flight count; `false` for an unknown worker
    async fn heartbeat(
        &self,
        worker_id: &WorkerId,
        in_flight: usize,
        now: DateTime<Utc>,
    ) -> QueueResult<bool>;

    async fn unregister(&self, worker_id: &WorkerId) -> QueueResult<bool>;

    async fn get(&self, worker_id: &WorkerId) -> QueueResult<Option<WorkerRegistration>>;

    async fn list(&self) -> QueueResult<Vec<WorkerRegistration>>;
}

/// Time-bounded storage of completed task results
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn put(&self, id: &TaskId, result: Value, expires_at: DateTime<Utc>) -> QueueResult<()>;

    /// `None` once expired; expired entries are evicted on read
    async fn get(&self, id: &TaskId, now: DateTime<Utc>) -> QueueResult<Option<Value>>;

    async fn remove(&self, id: &TaskId) -> QueueResult<bool>;

    /// Evict everything expired at `now`, returning how many went
    async fn purge_expired(&self, now: DateTime<Utc>) -> QueueResult<usize>;
}

/// The four stores a queue service runs on
#[derive(Clone)]
pub struct QueueBackends {
    pub tasks: Arc<dyn TaskStore>,
    pub index: Arc<dyn PriorityIndex>,
    pub workers: Arc<dyn WorkerRegistry>,
    pub results: Arc<dyn ResultCache>,
}

impl QueueBackends {
    /// In-process stores
    pub fn memory() -> Self {
        Self {
            tasks: Arc::new(memory::MemoryTaskStore::new()),
            index: Arc::new(memory::MemoryPriorityIndex::new()),
            workers: Arc::new(memory::MemoryWorkerRegistry::new()),
            results: Arc::new(memory::MemoryResultCache::new()),
        }
    }

    pub fn with_task_store(mut self, tasks: Arc<dyn TaskStore>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_priority_index(mut self, index: Arc<dyn PriorityIndex>) -> Self {
        self.index = index;
        self
    }

    pub fn with_worker_registry(mut self, workers: Arc<dyn WorkerRegistry>) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_result_cache(mut self, results: Arc<dyn ResultCache>) -> Self {
        self.results = results;
        self
    }
}

impl Default for QueueBackends {
    fn default() -> Self {
        Self::memory()
    }
}
