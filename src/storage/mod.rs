//! Blob storage behind a single capability trait.
//!
//! Script bodies, the loader, and stored-strategy session records all go
//! through [`ScriptStore`]. Backends differ only in where bytes live.

pub mod file;
pub mod format;
pub mod memory;

use crate::ScriptwardenError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Get/put/delete key-value storage with optional per-entry TTL.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Fetch a value. Expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ScriptwardenError>;

    /// Store a value, replacing any previous one.
    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), ScriptwardenError>;

    /// Remove a value. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), ScriptwardenError>;

    /// Store a value only if no live value exists under `key`.
    ///
    /// Returns `true` when this call created the entry. Of any number of
    /// concurrent callers for one key, at most one sees `true`.
    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, ScriptwardenError>;

    /// Remove a value and return it.
    ///
    /// Of any number of concurrent callers for one key, at most one gets
    /// the value back.
    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, ScriptwardenError>;

    /// Drop every expired entry, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize, ScriptwardenError>;

    /// Fetch a value as UTF-8 text.
    async fn get_text(&self, key: &str) -> Result<Option<String>, ScriptwardenError> {
        match self.get(key).await? {
            Some(bytes) => String::from_utf8(bytes).map(Some).map_err(|e| {
                ScriptwardenError::StorageIO(format!("Value for '{}' is not UTF-8: {}", key, e))
            }),
            None => Ok(None),
        }
    }
}

/// Purge expired entries from `store` every `interval`, until the runtime
/// shuts down or the handle is aborted.
pub fn spawn_sweeper(store: Arc<dyn ScriptStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(store = store.name(), removed, "purged expired entries"),
                Err(e) => tracing::warn!(store = store.name(), error = %e, "expired entry sweep failed"),
            }
        }
    })
}
