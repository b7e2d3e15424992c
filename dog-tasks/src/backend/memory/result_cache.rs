use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use crate::{backend::ResultCache, QueueResult, TaskId};

#[derive(Debug, Clone)]
struct CachedResult {
    value: Value,
    expires_at: DateTime<Utc>,
}

/// In-memory result cache with lazy expiry
#[derive(Clone, Default)]
pub struct MemoryResultCache {
    entries: Arc<Mutex<HashMap<TaskId, CachedResult>>>,
}

impl MemoryResultCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultCache for MemoryResultCache {
    async fn put(&self, id: &TaskId, result: Value, expires_at: DateTime<Utc>) -> QueueResult<()> {
        self.entries.lock().insert(
            id.clone(),
            CachedResult {
                value: result,
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, id: &TaskId, now: DateTime<Utc>) -> QueueResult<Option<Value>> {
        let mut entries = self.entries.lock();
        match entries.get(id) {
            Some(cached) if cached.expires_at > now => Ok(Some(cached.value.clone())),
            Some(_) => {
                entries.remove(id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, id: &TaskId) -> QueueResult<bool> {
        Ok(self.entries.lock().remove(id).is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> QueueResult<usize> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, cached| cached.expires_at > now);
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_entry_expires_at_ttl() {
        let cache = MemoryResultCache::new();
        let now = Utc::now();
        let id = TaskId::from("t1");
        cache.put(&id, json!({"ok": true}), now + chrono::Duration::seconds(10)).await.unwrap();

        let before = now + chrono::Duration::seconds(9);
        assert_eq!(cache.get(&id, before).await.unwrap(), Some(json!({"ok": true})));

        let after = now + chrono::Duration::seconds(10);
        assert_eq!(cache.get(&id, after).await.unwrap(), None);
        // Lazily evicted on the read above.
        assert!(!cache.remove(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let cache = MemoryResultCache::new();
        let now = Utc::now();
        cache.put(&TaskId::from("old"), json!(1), now).await.unwrap();
        cache.put(&TaskId::from("fresh"), json!(2), now + chrono::Duration::hours(1)).await.unwrap();

        assert_eq!(cache.purge_expired(now).await.unwrap(), 1);
        assert_eq!(cache.get(&TaskId::from("fresh"), now).await.unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_remove_outside_runtime() {
        let cache = MemoryResultCache::new();
        let id = TaskId::from("t1");

        tokio_test::block_on(async {
            cache.put(&id, json!(null), Utc::now()).await.unwrap();
            assert!(cache.remove(&id).await.unwrap());
            assert!(!cache.remove(&id).await.unwrap());
        });
    }
}
