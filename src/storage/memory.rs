//! In-process storage backend.

use crate::clock::Clock;
use crate::crypto::expiry::expires_at;
use crate::storage::ScriptStore;
use crate::ScriptwardenError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<i64>,
}

impl MemoryEntry {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// `HashMap`-backed store. Contents vanish with the process.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Seed a non-expiring text value before the store is shared.
    pub fn with_text(mut self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.entries.get_mut().insert(
            key.into(),
            MemoryEntry {
                value: text.into().into_bytes(),
                expires_at: None,
            },
        );
        self
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let now = self.clock.now_unix();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    /// Whether the store holds no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ScriptStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ScriptwardenError> {
        let now = self.clock.now_unix();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.is_live(now) => {
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
            }
        }

        // Expired: evict under the write lock, re-checking in case of a concurrent put.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), ScriptwardenError> {
        let entry = MemoryEntry {
            value,
            expires_at: ttl.map(|ttl| expires_at(self.clock.as_ref(), ttl)),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ScriptwardenError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, ScriptwardenError> {
        let now = self.clock.now_unix();
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: ttl.map(|ttl| expires_at(self.clock.as_ref(), ttl)),
            },
        );
        Ok(true)
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, ScriptwardenError> {
        let now = self.clock.now_unix();
        let taken = self.entries.write().await.remove(key);
        Ok(taken.filter(|e| e.is_live(now)).map(|e| e.value))
    }

    async fn purge_expired(&self) -> Result<usize, ScriptwardenError> {
        let now = self.clock.now_unix();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    #[tokio::test]
    async fn test_memory_store_seeded_text() {
        let store = MemoryStore::new(Arc::new(MockClock::at_unix(0))).with_text("DoorESP.lua", "-- code");
        assert_eq!(
            store.get_text("DoorESP.lua").await.unwrap().as_deref(),
            Some("-- code")
        );
        assert!(store.get("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_put_get_delete() {
        let store = MemoryStore::new(Arc::new(MockClock::at_unix(0)));
        store.put("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        store.delete("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_memory_store_ttl() {
        let clock = Arc::new(MockClock::at_unix(1_000));
        let store = MemoryStore::new(clock.clone());
        store
            .put("whitelist:t", b"r".to_vec(), Some(Duration::from_secs(600)))
            .await
            .unwrap();
        assert_eq!(store.len().await, 1);

        clock.advance_secs(599);
        assert!(store.get("whitelist:t").await.unwrap().is_some());

        clock.advance_secs(1);
        assert!(store.get("whitelist:t").await.unwrap().is_none());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_memory_store_get_text_rejects_binary() {
        let store = MemoryStore::new(Arc::new(MockClock::at_unix(0)));
        store.put("bin", vec![0xff, 0xfe], None).await.unwrap();
        let result = store.get_text("bin").await;
        assert!(matches!(result, Err(ScriptwardenError::StorageIO(_))));
    }

    #[tokio::test]
    async fn test_memory_store_put_if_absent() {
        let clock = Arc::new(MockClock::at_unix(1_000));
        let store = MemoryStore::new(clock.clone());
        let ttl = Some(Duration::from_secs(60));

        assert!(store.put_if_absent("used:n1", b"1".to_vec(), ttl).await.unwrap());
        assert!(!store.put_if_absent("used:n1", b"1".to_vec(), ttl).await.unwrap());

        // An expired entry does not block a new one.
        clock.advance_secs(60);
        assert!(store.put_if_absent("used:n1", b"2".to_vec(), ttl).await.unwrap());
        assert_eq!(store.get("used:n1").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn test_memory_store_take_once() {
        let clock = Arc::new(MockClock::at_unix(1_000));
        let store = MemoryStore::new(clock.clone());
        store.put("whitelist:a", b"r".to_vec(), None).await.unwrap();

        assert_eq!(store.take("whitelist:a").await.unwrap(), Some(b"r".to_vec()));
        assert!(store.take("whitelist:a").await.unwrap().is_none());

        store
            .put("whitelist:b", b"r".to_vec(), Some(Duration::from_secs(10)))
            .await
            .unwrap();
        clock.advance_secs(10);
        assert!(store.take("whitelist:b").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_memory_store_concurrent_put_if_absent_single_winner() {
        let store = Arc::new(MemoryStore::new(Arc::new(MockClock::at_unix(0))));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.put_if_absent("used:race", b"1".to_vec(), None).await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_memory_store_purge_expired() {
        let clock = Arc::new(MockClock::at_unix(1_000));
        let store = MemoryStore::new(clock.clone()).with_text("loader.lua", "-- loader");
        for i in 0..5 {
            store
                .put(&format!("used:{}", i), b"1".to_vec(), Some(Duration::from_secs(30)))
                .await
                .unwrap();
        }
        assert_eq!(store.purge_expired().await.unwrap(), 0);

        clock.advance_secs(30);
        assert_eq!(store.purge_expired().await.unwrap(), 5);
        assert_eq!(store.entries.read().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_reclaims_expired_entries() {
        let clock = Arc::new(MockClock::at_unix(1_000));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        store
            .put("used:n1", b"1".to_vec(), Some(Duration::from_secs(30)))
            .await
            .unwrap();

        let sweeper = crate::storage::spawn_sweeper(store.clone(), Duration::from_secs(60));
        clock.advance_secs(30);
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(store.entries.read().await.is_empty());
        sweeper.abort();
    }
}
