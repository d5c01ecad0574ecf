//! `/authorize`: API key → script menu, optionally a script grant.
//!
//! Decision order:
//! 1. Client check, kill switch
//! 2. Body (plain or obfuscated JSON)
//! 3. Key lookup
//! 4. No script requested: menu only
//! 5. Permission, enabled state, body in storage
//! 6. Session token

use crate::audit::{AuditKind, ClientInfo};
use crate::config::ScriptwardenConfig;
use crate::crypto::obfuscate::obfuscate;
use crate::policy::access::check_access;
use crate::policy::catalog::ScriptSummary;
use crate::protocol::models::{Actor, AuthorizeRequest, AuthorizeResponse, ScriptGrant, VALIDATE_PATH};
use crate::service::{issue_error, ServiceContext, AUTHORIZE_PATH};
use crate::token::NewSession;
use crate::ScriptwardenError;
use std::time::Duration;

const GRANTED_KEY_VISIBLE: usize = 8;
const REFUSED_KEY_VISIBLE: usize = 12;

/// Authorization endpoint logic.
pub struct AuthorizationService {
    ctx: ServiceContext,
    grant_ttl: Duration,
    obfuscate_scripts: bool,
}

impl AuthorizationService {
    /// Create the service.
    pub fn new(ctx: ServiceContext, config: &ScriptwardenConfig) -> Self {
        Self {
            ctx,
            grant_ttl: config.token.grant_ttl(),
            obfuscate_scripts: config.obfuscate_scripts,
        }
    }

    /// Audit a request whose body could not be read at all.
    pub fn reject_unreadable(&self, client: &ClientInfo) -> ScriptwardenError {
        self.ctx
            .reject_body(ScriptwardenError::BodyUnreadable, client, AUTHORIZE_PATH)
    }

    /// Handle one `/authorize` request body.
    pub async fn authorize(
        &self,
        body: &[u8],
        client: &ClientInfo,
    ) -> Result<AuthorizeResponse, ScriptwardenError> {
        let ctx = &self.ctx;
        ctx.admit(client, AUTHORIZE_PATH)?;

        let request: AuthorizeRequest = ctx.parse_body(body, client, AUTHORIZE_PATH)?;
        let api_key = request.api_key().trim();
        let user_id = request.user_id_text();
        let place_id = request.place_id_text();
        let requested = request.requested_script();

        let refuse = |reason: &str| {
            ctx.audit.emit(
                ctx.event(AuditKind::AuthFail, client)
                    .reason(reason)
                    .api_key(api_key, REFUSED_KEY_VISIBLE)
                    .script(requested)
                    .subject(user_id.clone(), request.username.clone(), place_id.clone()),
            );
        };

        let Some(key) = ctx.keyring.resolve(api_key) else {
            tracing::warn!(client_ip = %client.ip, "unknown api key");
            refuse("Invalid API key");
            return Err(ScriptwardenError::UnknownApiKey);
        };

        let actor = Actor {
            label: key.label.to_string(),
            user_id: request.user_id.clone(),
            username: request.username.clone(),
            place_id: request.place_id.clone(),
        };
        let response = AuthorizeResponse::menu(ctx.catalog.menu(key.permissions), actor);

        let Some(script_id) = requested else {
            tracing::info!(label = key.label, client_ip = %client.ip, "menu authorized");
            ctx.audit.emit(
                ctx.event(AuditKind::AuthSuccess, client)
                    .api_key(api_key, GRANTED_KEY_VISIBLE)
                    .subject(user_id.clone(), request.username.clone(), place_id.clone()),
            );
            return Ok(response);
        };

        if let Err(e) = check_access(&key, script_id, &ctx.catalog) {
            tracing::warn!(script_id, label = key.label, client_ip = %client.ip, "script not permitted");
            refuse("Script not permitted for this key");
            return Err(e);
        }

        let descriptor = match ctx.catalog.get(script_id) {
            Some(descriptor) if descriptor.enabled => descriptor,
            _ => {
                tracing::warn!(script_id, "requested script is disabled");
                refuse("Script disabled");
                return Err(ScriptwardenError::ScriptDisabled);
            }
        };

        let script_body = match ctx.store.get_text(&descriptor.storage_key).await {
            Ok(Some(text)) if !text.is_empty() => text,
            outcome => {
                if let Err(e) = outcome {
                    tracing::error!(storage_key = %descriptor.storage_key, error = %e, "script fetch failed");
                } else {
                    tracing::error!(storage_key = %descriptor.storage_key, "script body missing");
                }
                refuse("Script body missing");
                return Err(ScriptwardenError::ScriptBodyMissing {
                    storage_key: descriptor.storage_key.clone(),
                });
            }
        };

        let session = NewSession {
            script_id: script_id.to_string(),
            user_id: user_id.clone(),
            username: request.username.clone(),
        };
        let issued = match ctx.tokens.issue(session, self.grant_ttl).await {
            Ok(issued) => issued,
            Err(e) => {
                tracing::error!(script_id, strategy = ctx.tokens.name(), error = %e, "token issue failed");
                refuse("Failed to issue session token");
                return Err(issue_error(e));
            }
        };

        let (script, script_encrypted) = if self.obfuscate_scripts {
            (obfuscate(script_body.as_bytes(), &ctx.obfuscation_key), true)
        } else {
            (script_body, false)
        };

        tracing::info!(script_id, label = key.label, client_ip = %client.ip, "script granted");
        ctx.audit.emit(
            ctx.event(AuditKind::AuthSuccess, client)
                .api_key(api_key, GRANTED_KEY_VISIBLE)
                .script(Some(script_id))
                .subject(user_id, request.username.clone(), place_id),
        );

        Ok(response.with_grant(ScriptGrant {
            script,
            script_encrypted,
            script_meta: ScriptSummary::from(descriptor),
            access_token: issued.token,
            expires_in: issued.expires_in,
            validate_path: VALIDATE_PATH,
        }))
    }
}
