//! On-disk envelope for values written through the file backend.
//!
//! The envelope records:
//! - The original key (so a hashed filename can be checked on load)
//! - The value bytes, base64-encoded
//! - When the value was written and, optionally, when it expires

use crate::clock::Clock;
use crate::crypto::expiry::expires_at;
use crate::ScriptwardenError;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A stored value with its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    /// Key the value was written under.
    pub key: String,

    /// Value bytes, base64.
    pub value: String,

    /// When the entry was written.
    pub stored_at: DateTime<Utc>,

    /// Unix second from which the entry reads as absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl StoredEntry {
    /// Wrap a value for storage.
    pub fn new(key: &str, value: &[u8], ttl: Option<Duration>, clock: &dyn Clock) -> Self {
        Self {
            key: key.to_string(),
            value: STANDARD.encode(value),
            stored_at: clock.now_utc(),
            expires_at: ttl.map(|ttl| expires_at(clock, ttl)),
        }
    }

    /// Serialize the entry to JSON.
    pub fn to_json(&self) -> Result<String, ScriptwardenError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ScriptwardenError::StorageIO(format!("Failed to serialize entry: {}", e)))
    }

    /// Deserialize an entry from JSON.
    pub fn from_json(json: &str) -> Result<Self, ScriptwardenError> {
        serde_json::from_str(json)
            .map_err(|e| ScriptwardenError::StorageIO(format!("Failed to deserialize entry: {}", e)))
    }

    /// Whether the entry has lapsed at the clock's current time.
    pub fn is_expired(&self, clock: &dyn Clock) -> bool {
        self.expires_at
            .is_some_and(|deadline| clock.now_unix() >= deadline)
    }

    /// Decode the stored bytes.
    pub fn value_bytes(&self) -> Result<Vec<u8>, ScriptwardenError> {
        STANDARD
            .decode(&self.value)
            .map_err(|e| ScriptwardenError::StorageIO(format!("Corrupt entry '{}': {}", self.key, e)))
    }
}
