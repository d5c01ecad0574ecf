//! `/validate`: verify a session token and hand back its successor.

use crate::audit::{AuditKind, ClientInfo};
use crate::config::{RotationPolicy, ScriptwardenConfig};
use crate::protocol::models::{ValidateRequest, ValidateResponse, VALIDATE_PATH};
use crate::service::{issue_error, ServiceContext};
use crate::ScriptwardenError;
use std::time::Duration;

/// Validation endpoint logic.
pub struct ValidationService {
    ctx: ServiceContext,
    rotation: RotationPolicy,
    session_ttl: Duration,
    extension_ttl: Duration,
    log_validations: bool,
}

impl ValidationService {
    /// Create the service.
    pub fn new(ctx: ServiceContext, config: &ScriptwardenConfig) -> Self {
        Self {
            ctx,
            rotation: config.token.rotation,
            session_ttl: config.token.session_ttl(),
            extension_ttl: config.token.extension_ttl(),
            log_validations: config.audit.log_validations,
        }
    }

    /// Audit a request whose body could not be read at all.
    pub fn reject_unreadable(&self, client: &ClientInfo) -> ScriptwardenError {
        self.ctx
            .reject_body(ScriptwardenError::BodyUnreadable, client, VALIDATE_PATH)
    }

    /// Handle one `/validate` request body.
    ///
    /// With rotation, the presented token is consumed before its successor
    /// is issued, so a replay of the old token fails even if issuing does.
    /// Consumption is atomic, so of two concurrent validations of one token
    /// only one rotates; the other is refused as invalid.
    pub async fn validate(
        &self,
        body: &[u8],
        client: &ClientInfo,
    ) -> Result<ValidateResponse, ScriptwardenError> {
        let ctx = &self.ctx;
        ctx.admit(client, VALIDATE_PATH)?;

        let request: ValidateRequest = ctx.parse_body(body, client, VALIDATE_PATH)?;
        let Some(token) = request.token() else {
            tracing::warn!(client_ip = %client.ip, "validation without token");
            ctx.audit.emit(
                ctx.event(AuditKind::ValidateFail, client)
                    .reason("Token missing")
                    .script(request.expected_script()),
            );
            return Err(ScriptwardenError::TokenMissing);
        };
        let expected = request.expected_script();

        let refuse = |reason: &str| {
            ctx.event(AuditKind::ValidateFail, client)
                .reason(reason)
                .script(expected)
        };

        let claims = match ctx.tokens.verify(token).await {
            Ok(claims) => claims,
            Err(e) if e.is_token_rejection() => {
                tracing::warn!(client_ip = %client.ip, error = %e, "token rejected");
                ctx.audit.emit(refuse("Token expired or invalid"));
                return Err(e);
            }
            Err(e) => {
                tracing::error!(strategy = ctx.tokens.name(), error = %e, "token lookup failed");
                ctx.audit.emit(refuse("Token lookup failed"));
                return Err(e);
            }
        };

        if let Some(expected) = expected {
            if expected != claims.script_id {
                tracing::warn!(
                    client_ip = %client.ip,
                    expected,
                    actual = %claims.script_id,
                    "token/script mismatch"
                );
                ctx.audit
                    .emit(refuse("Token/script mismatch").expected_script(&claims.script_id));
                return Err(ScriptwardenError::ScriptMismatch);
            }
        }

        let rotate = match self.rotation {
            RotationPolicy::Always => true,
            RotationPolicy::Optional => request.refresh != Some(false),
        };

        let outcome = if rotate {
            self.rotate(token, &claims).await
        } else {
            ctx.tokens
                .extend(token, &claims, self.extension_ttl)
                .await
                .map(|expires_in| (expires_in, None))
        };

        let (expires_in, new_token) = match outcome {
            Ok(outcome) => outcome,
            Err(e) if e.is_token_rejection() => {
                tracing::warn!(script_id = %claims.script_id, error = %e, "token consumed by a concurrent validation");
                ctx.audit.emit(refuse("Token expired or invalid"));
                return Err(e);
            }
            Err(e) => {
                tracing::error!(script_id = %claims.script_id, error = %e, "session renewal failed");
                ctx.audit.emit(refuse("Failed to rotate session token"));
                return Err(issue_error(e));
            }
        };

        tracing::debug!(script_id = %claims.script_id, rotated = rotate, expires_in, "token validated");
        if self.log_validations {
            ctx.audit.emit(
                ctx.event(AuditKind::ValidateSuccess, client)
                    .script(Some(&claims.script_id))
                    .subject(claims.user_id.clone(), claims.username.clone(), None),
            );
        }

        Ok(ValidateResponse {
            ok: true,
            script_id: claims.script_id,
            expires_in,
            new_token,
        })
    }

    async fn rotate(
        &self,
        token: &str,
        claims: &crate::token::SessionClaims,
    ) -> Result<(u64, Option<String>), ScriptwardenError> {
        self.ctx.tokens.revoke(token, claims).await?;
        let issued = self.ctx.tokens.issue(claims.session(), self.session_ttl).await?;
        Ok((issued.expires_in, Some(issued.token)))
    }
}
