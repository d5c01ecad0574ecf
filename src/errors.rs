//! Scriptwarden error types.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur while authorizing, validating, or serving scripts.
#[derive(Debug, Error)]
pub enum ScriptwardenError {
    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The global kill switch is engaged.
    #[error("Global kill switch active")]
    KillSwitchActive,

    /// The request did not come from the required client.
    #[error("Invalid client")]
    InvalidClient,

    /// The request body could not be read as text.
    #[error("Failed to read request body")]
    BodyUnreadable,

    /// The request body is not the expected JSON document.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// No session token was supplied.
    #[error("Token missing")]
    TokenMissing,

    /// The presented API key is not in the keyring.
    #[error("Unknown API key")]
    UnknownApiKey,

    /// The API key is valid but may not access the requested script.
    #[error("API key not permitted for this script")]
    ScriptNotPermitted,

    /// The requested script exists but is switched off.
    #[error("Requested script is disabled")]
    ScriptDisabled,

    /// The script is enabled but its body is absent from storage.
    #[error("Script body missing in storage ({storage_key})")]
    ScriptBodyMissing {
        /// Storage key that came back empty.
        storage_key: String,
    },

    /// The token's script does not match the script the caller expected.
    #[error("Token/script mismatch")]
    ScriptMismatch,

    /// The token string is not `<payload>.<mac>`.
    #[error("Token is malformed")]
    TokenMalformed,

    /// Signature mismatch, unknown token, or a token that was already consumed.
    #[error("Token signature invalid or token unknown")]
    TokenInvalid,

    /// The token is past its expiry.
    #[error("Token expired at {expired_at}")]
    TokenExpired {
        /// When the token stopped being valid.
        expired_at: DateTime<Utc>,
    },

    /// A new token could not be minted.
    #[error("Token issue error: {0}")]
    TokenIssue(String),

    /// Storage backend failure.
    #[error("Storage I/O error: {0}")]
    StorageIO(String),

    /// Audit sink delivery failure.
    #[error("Audit transport error: {0}")]
    AuditTransport(String),
}

impl ScriptwardenError {
    /// Whether the error describes a token that must not be honoured.
    pub fn is_token_rejection(&self) -> bool {
        matches!(
            self,
            Self::TokenMalformed | Self::TokenInvalid | Self::TokenExpired { .. }
        )
    }
}
