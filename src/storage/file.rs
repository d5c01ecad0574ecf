//! File-based storage backend with atomic writes.
//!
//! Layout under the root directory:
//! - `<key>`: plain files placed by an operator (script bodies, the loader).
//!   Read-only from the service's point of view.
//! - `entries/<sha256(key)>.json`: values written through [`ScriptStore::put`],
//!   wrapped in a [`StoredEntry`] envelope carrying the TTL.
//!
//! Written entries shadow plain files with the same key. Writes go through a
//! temp file + rename. `put_if_absent` publishes its temp file with a hard
//! link, which fails when the target exists, and `take` renames the entry
//! out of place before reading it, so exactly one caller wins either race.

use crate::clock::Clock;
use crate::crypto::mac::hash_key;
use crate::storage::format::StoredEntry;
use crate::storage::ScriptStore;
use crate::ScriptwardenError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;

const ENTRIES_DIR: &str = "entries";

/// File-based storage backend.
pub struct FileStore {
    root: PathBuf,
    entries_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self, ScriptwardenError> {
        let root = root.into();
        let entries_dir = root.join(ENTRIES_DIR);

        std::fs::create_dir_all(&entries_dir)
            .map_err(|e| ScriptwardenError::StorageIO(format!("Failed to create store dir: {}", e)))?;

        Ok(Self {
            root,
            entries_dir,
            clock,
        })
    }

    /// Open a store under `dirs::data_dir()/<namespace>/`.
    pub fn in_data_dir(namespace: &str, clock: Arc<dyn Clock>) -> Result<Self, ScriptwardenError> {
        let base_dir = dirs::data_dir()
            .ok_or_else(|| ScriptwardenError::StorageIO("Could not find data directory".to_string()))?;
        Self::new(base_dir.join(namespace), clock)
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.entries_dir.join(format!("{}.json", hash_key(key)))
    }

    /// Path of an operator-provided file, if the key is a plain file name.
    fn plain_path(&self, key: &str) -> Option<PathBuf> {
        let is_plain = !key.is_empty()
            && !key.starts_with('.')
            && key != ENTRIES_DIR
            && !key.contains(['/', '\\', ':']);
        is_plain.then(|| self.root.join(key))
    }

    async fn load_entry(&self, key: &str) -> Result<Option<StoredEntry>, ScriptwardenError> {
        let Some(entry) = Self::read_envelope(&self.entry_path(key)).await? else {
            return Ok(None);
        };
        if entry.key != key {
            // Hash collision or a hand-edited file; either way not ours.
            return Ok(None);
        }
        Ok(Some(entry))
    }

    fn scratch_path(&self, key: &str, suffix: &str) -> PathBuf {
        self.entries_dir
            .join(format!("{}.{:016x}.{}", hash_key(key), rand::random::<u64>(), suffix))
    }

    async fn write_temp(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<PathBuf, ScriptwardenError> {
        let temp_path = self.scratch_path(key, "tmp");
        let json = StoredEntry::new(key, value, ttl, self.clock.as_ref()).to_json()?;

        fs::write(&temp_path, json.as_bytes())
            .await
            .map_err(|e| ScriptwardenError::StorageIO(format!("Failed to write temp file: {}", e)))?;
        Ok(temp_path)
    }

    async fn read_envelope(path: &Path) -> Result<Option<StoredEntry>, ScriptwardenError> {
        match fs::read_to_string(path).await {
            Ok(json) => StoredEntry::from_json(&json).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ScriptwardenError::StorageIO(format!(
                "Failed to read entry file: {}",
                e
            ))),
        }
    }

    /// Link `temp_path` into place unless a live entry already holds the key.
    async fn link_if_absent(&self, key: &str, temp_path: &Path) -> Result<bool, ScriptwardenError> {
        let target_path = self.entry_path(key);

        // A second attempt follows clearing an expired or vanished entry.
        for _ in 0..2 {
            match fs::hard_link(temp_path, &target_path).await {
                Ok(()) => return Ok(true),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(ScriptwardenError::StorageIO(format!(
                        "Failed to link entry file: {}",
                        e
                    )))
                }
            }

            match self.load_entry(key).await? {
                Some(existing) if !existing.is_expired(self.clock.as_ref()) => return Ok(false),
                Some(_) => Self::remove_if_present(&target_path).await?,
                None => {}
            }
        }
        Ok(false)
    }

    async fn remove_if_present(path: &Path) -> Result<(), ScriptwardenError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ScriptwardenError::StorageIO(format!(
                "Failed to delete entry: {}",
                e
            ))),
        }
    }
}

#[async_trait]
impl ScriptStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ScriptwardenError> {
        if let Some(entry) = self.load_entry(key).await? {
            if entry.is_expired(self.clock.as_ref()) {
                Self::remove_if_present(&self.entry_path(key)).await?;
                return Ok(None);
            }
            return entry.value_bytes().map(Some);
        }

        let Some(path) = self.plain_path(key) else {
            return Ok(None);
        };
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ScriptwardenError::StorageIO(format!(
                "Failed to read '{}': {}",
                key, e
            ))),
        }
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), ScriptwardenError> {
        let target_path = self.entry_path(key);
        let temp_path = self.write_temp(key, &value, ttl).await?;

        fs::rename(&temp_path, &target_path)
            .await
            .map_err(|e| ScriptwardenError::StorageIO(format!("Failed to rename entry file: {}", e)))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ScriptwardenError> {
        Self::remove_if_present(&self.entry_path(key)).await
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, ScriptwardenError> {
        let temp_path = self.write_temp(key, &value, ttl).await?;
        let linked = self.link_if_absent(key, &temp_path).await;
        Self::remove_if_present(&temp_path).await?;
        linked
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, ScriptwardenError> {
        let taken_path = self.scratch_path(key, "taken");
        match fs::rename(self.entry_path(key), &taken_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ScriptwardenError::StorageIO(format!(
                    "Failed to claim entry file: {}",
                    e
                )))
            }
        }

        let entry = Self::read_envelope(&taken_path).await;
        Self::remove_if_present(&taken_path).await?;

        match entry? {
            Some(entry) if entry.key == key && !entry.is_expired(self.clock.as_ref()) => {
                entry.value_bytes().map(Some)
            }
            _ => Ok(None),
        }
    }

    async fn purge_expired(&self) -> Result<usize, ScriptwardenError> {
        let mut dir = fs::read_dir(&self.entries_dir)
            .await
            .map_err(|e| ScriptwardenError::StorageIO(format!("Failed to list entries: {}", e)))?;

        let mut removed = 0;
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| ScriptwardenError::StorageIO(format!("Failed to list entries: {}", e)))?
        {
            let path = item.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            match Self::read_envelope(&path).await {
                Ok(Some(entry)) if entry.is_expired(self.clock.as_ref()) => {
                    Self::remove_if_present(&path).await?;
                    removed += 1;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable entry"),
            }
        }
        Ok(removed)
    }
}
