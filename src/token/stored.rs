//! Opaque session tokens backed by a storage lookup.
//!
//! The token is 16 random bytes, hex-encoded. Its claims live in the store
//! under `whitelist:<token>` with the same TTL as the token itself.

use crate::clock::Clock;
use crate::crypto::expiry::check_expiry;
use crate::storage::ScriptStore;
use crate::token::{random_hex, IssuedToken, NewSession, SessionClaims, TokenStrategy};
use crate::ScriptwardenError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Storage prefix for live token records.
pub const TOKEN_PREFIX: &str = "whitelist:";

const TOKEN_BYTES: usize = 16;

/// Server-side session tokens.
pub struct StoredTokenStrategy {
    store: Arc<dyn ScriptStore>,
    clock: Arc<dyn Clock>,
}

impl StoredTokenStrategy {
    /// Create a strategy that keeps records in `store`.
    pub fn new(store: Arc<dyn ScriptStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn record_key(token: &str) -> String {
        format!("{}{}", TOKEN_PREFIX, token)
    }

    fn is_token_shaped(token: &str) -> bool {
        token.len() == TOKEN_BYTES * 2 && token.bytes().all(|b| b.is_ascii_hexdigit())
    }

    async fn write_record(&self, token: &str, claims: &SessionClaims, ttl: Duration) -> Result<(), ScriptwardenError> {
        let record = serde_json::to_vec(claims)
            .map_err(|e| ScriptwardenError::TokenIssue(format!("Failed to serialize record: {}", e)))?;
        self.store
            .put(&Self::record_key(token), record, Some(ttl))
            .await
            .map_err(|e| ScriptwardenError::TokenIssue(e.to_string()))
    }
}

#[async_trait]
impl TokenStrategy for StoredTokenStrategy {
    fn name(&self) -> &'static str {
        "stored"
    }

    async fn issue(&self, session: NewSession, ttl: Duration) -> Result<IssuedToken, ScriptwardenError> {
        let token = random_hex(TOKEN_BYTES);
        let mut claims = SessionClaims::mint(session, self.clock.as_ref(), ttl);
        claims.nonce = token.clone();

        self.write_record(&token, &claims, ttl).await?;

        Ok(IssuedToken {
            token,
            claims,
            expires_in: ttl.as_secs(),
        })
    }

    async fn verify(&self, token: &str) -> Result<SessionClaims, ScriptwardenError> {
        if !Self::is_token_shaped(token) {
            return Err(ScriptwardenError::TokenMalformed);
        }

        let record = self
            .store
            .get(&Self::record_key(token))
            .await?
            .ok_or(ScriptwardenError::TokenInvalid)?;

        let claims: SessionClaims = serde_json::from_slice(&record).map_err(|e| {
            tracing::warn!(error = %e, "unreadable token record");
            ScriptwardenError::TokenInvalid
        })?;

        check_expiry(claims.expires_at, self.clock.as_ref())?;

        Ok(claims)
    }

    async fn revoke(&self, token: &str, _claims: &SessionClaims) -> Result<(), ScriptwardenError> {
        if self.store.take(&Self::record_key(token)).await?.is_none() {
            tracing::warn!("token record already consumed");
            return Err(ScriptwardenError::TokenInvalid);
        }
        Ok(())
    }

    async fn extend(
        &self,
        token: &str,
        claims: &SessionClaims,
        ttl: Duration,
    ) -> Result<u64, ScriptwardenError> {
        let mut renewed = claims.clone();
        renewed.expires_at = crate::crypto::expiry::expires_at(self.clock.as_ref(), ttl);
        self.write_record(token, &renewed, ttl).await?;
        Ok(ttl.as_secs())
    }
}
