//! Session tokens.
//!
//! Two interchangeable strategies implement [`TokenStrategy`]:
//! - [`signed::SignedTokenCodec`]: self-contained HMAC-signed tokens. The
//!   default.
//! - [`stored::StoredTokenStrategy`]: opaque random tokens looked up in
//!   storage.
//!
//! Services only ever hold an `Arc<dyn TokenStrategy>`.

pub mod signed;
pub mod stored;

use crate::clock::Clock;
use crate::config::{TokenSettings, TokenStrategyKind};
use crate::storage::ScriptStore;
use crate::ScriptwardenError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub use signed::SignedTokenCodec;
pub use stored::StoredTokenStrategy;

/// Who a session is for and which script it unlocks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewSession {
    /// Script the session is bound to.
    pub script_id: String,
    /// Caller-supplied subject id.
    pub user_id: Option<String>,
    /// Caller-supplied subject display name.
    pub username: Option<String>,
}

/// The payload carried by every session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    /// Script the session is bound to.
    pub script_id: String,

    /// Subject id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Subject display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Unix second of issuance.
    pub issued_at: i64,

    /// Unix second from which the token is dead.
    pub expires_at: i64,

    /// Per-token random id, hex.
    pub nonce: String,
}

impl SessionClaims {
    /// Mint claims for a new session starting now.
    pub fn mint(session: NewSession, clock: &dyn Clock, ttl: Duration) -> Self {
        Self {
            script_id: session.script_id,
            user_id: session.user_id,
            username: session.username,
            issued_at: clock.now_unix(),
            expires_at: crate::crypto::expiry::expires_at(clock, ttl),
            nonce: random_hex(16),
        }
    }

    /// Subject and script, for issuing a successor.
    pub fn session(&self) -> NewSession {
        NewSession {
            script_id: self.script_id.clone(),
            user_id: self.user_id.clone(),
            username: self.username.clone(),
        }
    }
}

/// A freshly issued token and what it encodes.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Token string handed to the client.
    pub token: String,
    /// Claims the token carries.
    pub claims: SessionClaims,
    /// Lifetime in seconds.
    pub expires_in: u64,
}

/// Issue, verify, and retire session tokens.
#[async_trait]
pub trait TokenStrategy: Send + Sync {
    /// Short strategy name for logs.
    fn name(&self) -> &'static str;

    /// Issue a token for `session` valid for `ttl`.
    async fn issue(&self, session: NewSession, ttl: Duration) -> Result<IssuedToken, ScriptwardenError>;

    /// Verify a presented token and return its claims.
    ///
    /// # Errors
    /// * `TokenMalformed` - Not a token of this strategy's shape
    /// * `TokenInvalid` - Bad signature, unknown, or already consumed
    /// * `TokenExpired` - Past its expiry
    async fn verify(&self, token: &str) -> Result<SessionClaims, ScriptwardenError>;

    /// Consume `token` so it is unacceptable from now on.
    ///
    /// Consumption is atomic: when several callers revoke the same token
    /// concurrently, exactly one succeeds.
    ///
    /// # Errors
    /// * `TokenInvalid` - Another caller already consumed the token
    /// * `TokenExpired` - The token lapsed before it could be consumed
    async fn revoke(&self, token: &str, claims: &SessionClaims) -> Result<(), ScriptwardenError>;

    /// Keep `token` alive without rotating it. Returns the lifetime granted, in seconds.
    async fn extend(
        &self,
        token: &str,
        claims: &SessionClaims,
        ttl: Duration,
    ) -> Result<u64, ScriptwardenError>;
}

/// Build the strategy selected in configuration.
///
/// The signed strategy gets `store` as its replay guard.
pub fn build_strategy(
    settings: &TokenSettings,
    signing_secret: &str,
    store: Arc<dyn ScriptStore>,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn TokenStrategy>, ScriptwardenError> {
    let strategy: Arc<dyn TokenStrategy> = match settings.strategy {
        TokenStrategyKind::Signed => Arc::new(
            SignedTokenCodec::new(signing_secret.as_bytes().to_vec(), clock)?
                .with_replay_guard(store),
        ),
        TokenStrategyKind::Stored => Arc::new(StoredTokenStrategy::new(store, clock)),
    };
    Ok(strategy)
}

/// `len` random bytes, hex-encoded.
pub(crate) fn random_hex(len: usize) -> String {
    let bytes: Vec<u8> = (0..len).map(|_| rand::random::<u8>()).collect();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    #[test]
    fn test_mint_sets_times_and_nonce() {
        let clock = MockClock::at_unix(1_000);
        let claims = SessionClaims::mint(
            NewSession {
                script_id: "doorEsp".to_string(),
                user_id: Some("42".to_string()),
                username: Some("builder".to_string()),
            },
            &clock,
            Duration::from_secs(600),
        );
        assert_eq!(claims.issued_at, 1_000);
        assert_eq!(claims.expires_at, 1_600);
        assert_eq!(claims.nonce.len(), 32);
        assert_eq!(claims.session().script_id, "doorEsp");
    }

    #[test]
    fn test_nonces_differ() {
        assert_ne!(random_hex(16), random_hex(16));
    }

    #[test]
    fn test_claims_wire_names() {
        let clock = MockClock::at_unix(1_000);
        let claims = SessionClaims::mint(
            NewSession {
                script_id: "a".to_string(),
                user_id: Some("7".to_string()),
                username: None,
            },
            &clock,
            Duration::from_secs(1),
        );
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["scriptId"], "a");
        assert_eq!(json["userId"], "7");
        assert!(json.get("username").is_none());
        assert_eq!(json["expiresAt"], 1_001);
    }
}
