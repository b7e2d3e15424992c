use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::{
    backend::{IndexEntry, PriorityIndex},
    QueueResult, TaskId,
};

type Namespaces = HashMap<String, VecDeque<IndexEntry>>;

/// In-memory priority index
///
/// Insertion scans for the first entry of strictly lower priority, which
/// keeps equal priorities FIFO. O(n) per insert is fine at expected depths.
#[derive(Clone, Default)]
pub struct MemoryPriorityIndex {
    queues: Arc<Mutex<Namespaces>>,
}

impl MemoryPriorityIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PriorityIndex for MemoryPriorityIndex {
    async fn insert(&self, key: &str, entry: IndexEntry) -> QueueResult<()> {
        let mut queues = self.queues.lock();
        let queue = queues.entry(key.to_string()).or_default();

        let insert_pos = queue
            .iter()
            .position(|existing| existing.priority < entry.priority)
            .unwrap_or(queue.len());

        queue.insert(insert_pos, entry);
        Ok(())
    }

    async fn push_back(&self, key: &str, entry: IndexEntry) -> QueueResult<()> {
        self.queues
            .lock()
            .entry(key.to_string())
            .or_default()
            .push_back(entry);
        Ok(())
    }

    async fn pop_ready(&self, key: &str, now: DateTime<Utc>) -> QueueResult<Option<TaskId>> {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(key) else {
            return Ok(None);
        };

        // Entries still backing off are skipped in place.
        let ready = queue.iter().position(|entry| entry.is_ready(now));
        Ok(ready
            .and_then(|index| queue.remove(index))
            .map(|entry| entry.task_id))
    }

    async fn remove(&self, key: &str, id: &TaskId) -> QueueResult<bool> {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(key) else {
            return Ok(false);
        };

        match queue.iter().position(|entry| &entry.task_id == id) {
            Some(index) => {
                queue.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn entries(&self, key: &str) -> QueueResult<Vec<IndexEntry>> {
        Ok(self
            .queues
            .lock()
            .get(key)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn len(&self, key: &str) -> QueueResult<usize> {
        Ok(self.queues.lock().get(key).map(VecDeque::len).unwrap_or(0))
    }
}
