use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{backend::TaskStore, QueueResult, Task, TaskId};

/// In-memory task records
#[derive(Clone, Default)]
pub struct MemoryTaskStore {
    tasks: Arc<RwLock<HashMap<TaskId, Task>>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn put(&self, task: Task) -> QueueResult<()> {
        self.tasks.write().insert(task.id.clone(), task);
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> QueueResult<Option<Task>> {
        Ok(self.tasks.read().get(id).cloned())
    }

    async fn delete(&self, id: &TaskId) -> QueueResult<bool> {
        Ok(self.tasks.write().remove(id).is_some())
    }

    async fn list(&self) -> QueueResult<Vec<Task>> {
        Ok(self.tasks.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EnqueueOptions;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryTaskStore::new();
        let task = Task::new("build", serde_json::Value::Null, &EnqueueOptions::new(), chrono::Utc::now());
        let id = task.id.clone();

        store.put(task.clone()).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), Some(task));
        assert_eq!(store.list().await.unwrap().len(), 1);

        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
        assert!(store.get(&id).await.unwrap().is_none());
    }
}
