use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::{backend::WorkerRegistry, QueueResult, WorkerId, WorkerRegistration};

/// In-memory worker registry
///
/// Performs no liveness eviction; callers poll `list` and apply their own
/// staleness threshold.
#[derive(Clone, Default)]
pub struct MemoryWorkerRegistry {
    workers: Arc<RwLock<HashMap<WorkerId, WorkerRegistration>>>,
}

impl MemoryWorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerRegistry for MemoryWorkerRegistry {
    async fn register(&self, registration: WorkerRegistration) -> QueueResult<()> {
        self.workers
            .write()
            .insert(registration.worker_id.clone(), registration);
        Ok(())
    }

    async fn heartbeat(
        &self,
        worker_id: &WorkerId,
        in_flight: usize,
        now: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let mut workers = self.workers.write();
        match workers.get_mut(worker_id) {
            Some(registration) => {
                registration.last_heartbeat = now;
                registration.current_in_flight = in_flight;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn unregister(&self, worker_id: &WorkerId) -> QueueResult<bool> {
        Ok(self.workers.write().remove(worker_id).is_some())
    }

    async fn get(&self, worker_id: &WorkerId) -> QueueResult<Option<WorkerRegistration>> {
        Ok(self.workers.read().get(worker_id).cloned())
    }

    async fn list(&self) -> QueueResult<Vec<WorkerRegistration>> {
        let mut workers: Vec<_> = self.workers.read().values().cloned().collect();
        workers.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        Ok(workers)
    }
}
