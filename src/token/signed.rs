//! Self-contained HMAC-signed session tokens.
//!
//! Token format:
//! ```text
//! base64url(json(claims)) "." base64url(hmac_sha256(secret, base64url(json(claims))))
//! ```
//!
//! The MAC covers the encoded payload exactly as transmitted, so verification
//! never re-serializes anything. `.` is outside the base64url alphabet, which
//! makes the split unambiguous.
//!
//! Verification order:
//! 1. Shape (exactly two non-empty segments)
//! 2. MAC (constant-time)
//! 3. Payload decode
//! 4. Expiry
//! 5. Replay guard (only when one is attached)

use crate::clock::Clock;
use crate::crypto::expiry::{check_expiry, remaining_secs, unix_to_datetime};
use crate::crypto::mac::{compute_tag_b64, verify_tag_b64};
use crate::storage::ScriptStore;
use crate::token::{IssuedToken, NewSession, SessionClaims, TokenStrategy};
use crate::ScriptwardenError;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use std::sync::Arc;
use std::time::Duration;

/// Separator between payload and MAC.
pub const SEPARATOR: char = '.';

/// Storage prefix for consumed-token markers.
pub const USED_PREFIX: &str = "used:";

/// Stateless signed-token codec.
pub struct SignedTokenCodec {
    secret: Vec<u8>,
    clock: Arc<dyn Clock>,
    replay_guard: Option<Arc<dyn ScriptStore>>,
}

impl SignedTokenCodec {
    /// Create a codec with the given signing secret.
    ///
    /// # Errors
    /// * `ConfigError` - Secret is empty
    pub fn new(secret: Vec<u8>, clock: Arc<dyn Clock>) -> Result<Self, ScriptwardenError> {
        if secret.is_empty() {
            return Err(ScriptwardenError::ConfigError(
                "signing secret cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            secret,
            clock,
            replay_guard: None,
        })
    }

    /// Remember consumed tokens in `store` so they cannot be presented twice.
    pub fn with_replay_guard(mut self, store: Arc<dyn ScriptStore>) -> Self {
        self.replay_guard = Some(store);
        self
    }

    /// Serialize and sign claims.
    pub fn encode(&self, claims: &SessionClaims) -> Result<String, ScriptwardenError> {
        let json = serde_json::to_vec(claims)
            .map_err(|e| ScriptwardenError::TokenIssue(format!("Failed to serialize claims: {}", e)))?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let tag = compute_tag_b64(&self.secret, payload.as_bytes())?;
        Ok(format!("{}{}{}", payload, SEPARATOR, tag))
    }

    /// Check signature and expiry, returning the claims.
    ///
    /// Pure: no storage is consulted.
    pub fn decode(&self, token: &str) -> Result<SessionClaims, ScriptwardenError> {
        let (payload, tag) = token
            .split_once(SEPARATOR)
            .ok_or(ScriptwardenError::TokenMalformed)?;
        if payload.is_empty() || tag.is_empty() || tag.contains(SEPARATOR) {
            return Err(ScriptwardenError::TokenMalformed);
        }

        verify_tag_b64(&self.secret, payload.as_bytes(), tag)?;

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| ScriptwardenError::TokenMalformed)?;
        let claims: SessionClaims =
            serde_json::from_slice(&json).map_err(|_| ScriptwardenError::TokenMalformed)?;

        check_expiry(claims.expires_at, self.clock.as_ref())?;

        Ok(claims)
    }

    fn used_key(claims: &SessionClaims) -> String {
        format!("{}{}", USED_PREFIX, claims.nonce)
    }
}

#[async_trait]
impl TokenStrategy for SignedTokenCodec {
    fn name(&self) -> &'static str {
        "signed"
    }

    async fn issue(&self, session: NewSession, ttl: Duration) -> Result<IssuedToken, ScriptwardenError> {
        let claims = SessionClaims::mint(session, self.clock.as_ref(), ttl);
        let token = self.encode(&claims)?;
        Ok(IssuedToken {
            token,
            claims,
            expires_in: ttl.as_secs(),
        })
    }

    async fn verify(&self, token: &str) -> Result<SessionClaims, ScriptwardenError> {
        let claims = self.decode(token)?;

        if let Some(guard) = &self.replay_guard {
            if guard.get(&Self::used_key(&claims)).await?.is_some() {
                tracing::warn!(script_id = %claims.script_id, "consumed token presented again");
                return Err(ScriptwardenError::TokenInvalid);
            }
        }

        Ok(claims)
    }

    async fn revoke(&self, _token: &str, claims: &SessionClaims) -> Result<(), ScriptwardenError> {
        let Some(guard) = &self.replay_guard else {
            tracing::debug!("no replay guard attached, signed token stays valid until expiry");
            return Ok(());
        };

        let remaining = remaining_secs(claims.expires_at, self.clock.as_ref());
        if remaining == 0 {
            return Err(ScriptwardenError::TokenExpired {
                expired_at: unix_to_datetime(claims.expires_at),
            });
        }

        let claimed = guard
            .put_if_absent(
                &Self::used_key(claims),
                b"1".to_vec(),
                Some(Duration::from_secs(remaining)),
            )
            .await?;
        if !claimed {
            tracing::warn!(script_id = %claims.script_id, "token consumed concurrently");
            return Err(ScriptwardenError::TokenInvalid);
        }
        Ok(())
    }

    async fn extend(
        &self,
        _token: &str,
        claims: &SessionClaims,
        ttl: Duration,
    ) -> Result<u64, ScriptwardenError> {
        // Signed tokens are immutable; the caller keeps what is left, capped at ttl.
        Ok(remaining_secs(claims.expires_at, self.clock.as_ref()).min(ttl.as_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::storage::MemoryStore;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn session() -> NewSession {
        NewSession {
            script_id: "doorEsp".to_string(),
            user_id: Some("1234".to_string()),
            username: Some("builderman".to_string()),
        }
    }

    fn codec(clock: Arc<MockClock>) -> SignedTokenCodec {
        SignedTokenCodec::new(SECRET.to_vec(), clock).unwrap()
    }

    #[test]
    fn test_empty_secret_rejected() {
        let result = SignedTokenCodec::new(Vec::new(), Arc::new(MockClock::at_unix(0)));
        assert!(matches!(result, Err(ScriptwardenError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_issue_verify_roundtrip() {
        let clock = Arc::new(MockClock::at_unix(1_700_000_000));
        let codec = codec(clock);

        let issued = codec.issue(session(), Duration::from_secs(600)).await.unwrap();
        assert_eq!(issued.expires_in, 600);

        let claims = codec.verify(&issued.token).await.unwrap();
        assert_eq!(claims, issued.claims);
        assert_eq!(claims.script_id, "doorEsp");
        assert_eq!(claims.user_id.as_deref(), Some("1234"));
        assert_eq!(claims.username.as_deref(), Some("builderman"));
    }

    #[tokio::test]
    async fn test_token_has_two_segments() {
        let codec = codec(Arc::new(MockClock::at_unix(0)));
        let issued = codec.issue(session(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(issued.token.matches(SEPARATOR).count(), 1);
    }

    #[tokio::test]
    async fn test_expiry_boundary() {
        let clock = Arc::new(MockClock::at_unix(1_000));
        let codec = codec(clock.clone());
        let issued = codec.issue(session(), Duration::from_secs(600)).await.unwrap();

        clock.advance_secs(599);
        assert!(codec.verify(&issued.token).await.is_ok());

        clock.advance_secs(1);
        let result = codec.verify(&issued.token).await;
        assert!(matches!(result, Err(ScriptwardenError::TokenExpired { .. })));
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let clock = Arc::new(MockClock::at_unix(0));
        let issued = codec(clock.clone())
            .issue(session(), Duration::from_secs(60))
            .await
            .unwrap();

        let other = SignedTokenCodec::new(b"a-different-secret-of-some-length".to_vec(), clock).unwrap();
        let result = other.verify(&issued.token).await;
        assert!(matches!(result, Err(ScriptwardenError::TokenInvalid)));
    }

    #[tokio::test]
    async fn test_payload_swap_rejected() {
        let clock = Arc::new(MockClock::at_unix(0));
        let codec = codec(clock);
        let a = codec.issue(session(), Duration::from_secs(60)).await.unwrap();
        let mut other = session();
        other.script_id = "lunarity".to_string();
        let b = codec.issue(other, Duration::from_secs(60)).await.unwrap();

        let (payload_b, _) = b.token.split_once(SEPARATOR).unwrap();
        let (_, tag_a) = a.token.split_once(SEPARATOR).unwrap();
        let forged = format!("{}.{}", payload_b, tag_a);

        let result = codec.verify(&forged).await;
        assert!(matches!(result, Err(ScriptwardenError::TokenInvalid)));
    }

    #[test]
    fn test_malformed_shapes() {
        let codec = codec(Arc::new(MockClock::at_unix(0)));
        for token in ["", "abc", ".abc", "abc.", "a.b.c", "..."] {
            let result = codec.decode(token);
            assert!(
                matches!(result, Err(ScriptwardenError::TokenMalformed)),
                "token {:?} gave {:?}",
                token,
                result
            );
        }
    }

    #[test]
    fn test_signed_garbage_payload_is_malformed() {
        let codec = codec(Arc::new(MockClock::at_unix(0)));
        let payload = URL_SAFE_NO_PAD.encode(b"not claims");
        let tag = compute_tag_b64(SECRET, payload.as_bytes()).unwrap();
        let result = codec.decode(&format!("{}.{}", payload, tag));
        assert!(matches!(result, Err(ScriptwardenError::TokenMalformed)));
    }

    #[tokio::test]
    async fn test_revoke_with_replay_guard() {
        let clock = Arc::new(MockClock::at_unix(1_000));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let codec = codec(clock.clone()).with_replay_guard(store.clone());

        let issued = codec.issue(session(), Duration::from_secs(600)).await.unwrap();
        let claims = codec.verify(&issued.token).await.unwrap();
        codec.revoke(&issued.token, &claims).await.unwrap();

        let result = codec.verify(&issued.token).await;
        assert!(matches!(result, Err(ScriptwardenError::TokenInvalid)));

        // Marker lives exactly as long as the token would have.
        assert_eq!(store.len().await, 1);
        clock.advance_secs(600);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_revoke_consumes_once() {
        let clock = Arc::new(MockClock::at_unix(1_000));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let codec = codec(clock.clone()).with_replay_guard(store);

        let issued = codec.issue(session(), Duration::from_secs(600)).await.unwrap();
        let first = codec.verify(&issued.token).await.unwrap();
        let second = codec.verify(&issued.token).await.unwrap();

        codec.revoke(&issued.token, &first).await.unwrap();
        let result = codec.revoke(&issued.token, &second).await;
        assert!(matches!(result, Err(ScriptwardenError::TokenInvalid)));
    }

    #[tokio::test]
    async fn test_revoke_after_expiry() {
        let clock = Arc::new(MockClock::at_unix(1_000));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let codec = codec(clock.clone()).with_replay_guard(store);

        let issued = codec.issue(session(), Duration::from_secs(60)).await.unwrap();
        clock.advance_secs(60);
        let result = codec.revoke(&issued.token, &issued.claims).await;
        assert!(matches!(result, Err(ScriptwardenError::TokenExpired { .. })));
    }

    #[tokio::test]
    async fn test_revoke_without_guard_is_noop() {
        let codec = codec(Arc::new(MockClock::at_unix(0)));
        let issued = codec.issue(session(), Duration::from_secs(60)).await.unwrap();
        codec.revoke(&issued.token, &issued.claims).await.unwrap();
        assert!(codec.verify(&issued.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_extend_caps_at_remaining() {
        let clock = Arc::new(MockClock::at_unix(0));
        let codec = codec(clock.clone());
        let issued = codec.issue(session(), Duration::from_secs(600)).await.unwrap();

        let granted = codec
            .extend(&issued.token, &issued.claims, Duration::from_secs(120))
            .await
            .unwrap();
        assert_eq!(granted, 120);

        clock.advance_secs(550);
        let granted = codec
            .extend(&issued.token, &issued.claims, Duration::from_secs(120))
            .await
            .unwrap();
        assert_eq!(granted, 50);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::clock::MockClock;
    use proptest::prelude::*;

    fn fixed_token() -> (SignedTokenCodec, String) {
        let codec = SignedTokenCodec::new(
            b"proptest-signing-secret-material".to_vec(),
            Arc::new(MockClock::at_unix(1_700_000_000)),
        )
        .unwrap();
        let claims = SessionClaims {
            script_id: "doorEsp".to_string(),
            user_id: Some("1234".to_string()),
            username: Some("builderman".to_string()),
            issued_at: 1_700_000_000,
            expires_at: 1_700_000_600,
            nonce: "00112233445566778899aabbccddeeff".to_string(),
        };
        let token = codec.encode(&claims).unwrap();
        (codec, token)
    }

    proptest! {
        #[test]
        fn prop_any_bit_flip_is_rejected(index in 0usize..4096, bit in 0u8..8) {
            let (codec, token) = fixed_token();
            let mut bytes = token.into_bytes();
            let index = index % bytes.len();
            bytes[index] ^= 1 << bit;

            // Flips that leave ASCII can't form a &str token; those are rejected upstream.
            if let Ok(tampered) = String::from_utf8(bytes) {
                prop_assert!(codec.decode(&tampered).is_err());
            }
        }

        #[test]
        fn prop_roundtrip_preserves_subject(
            script in "[a-zA-Z]{1,16}",
            user in proptest::option::of("[0-9]{1,12}"),
            ttl in 1u64..100_000
        ) {
            let clock = Arc::new(MockClock::at_unix(1_700_000_000));
            let codec = SignedTokenCodec::new(b"k".repeat(32), clock.clone()).unwrap();
            let claims = SessionClaims::mint(
                NewSession { script_id: script.clone(), user_id: user.clone(), username: None },
                clock.as_ref(),
                Duration::from_secs(ttl),
            );
            let decoded = codec.decode(&codec.encode(&claims).unwrap()).unwrap();
            prop_assert_eq!(decoded.script_id, script);
            prop_assert_eq!(decoded.user_id, user);
        }
    }
}
