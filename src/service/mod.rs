//! Authorization and validation services.
//!
//! Both services share a [`ServiceContext`] holding the immutable tables and
//! the collaborator handles. They take raw request bytes plus [`ClientInfo`]
//! and return wire models or a [`ScriptwardenError`]; mapping errors to HTTP
//! lives in the server layer.

pub mod authorize;
pub mod validate;

use crate::audit::{AuditDispatcher, AuditEvent, AuditKind, ClientInfo};
use crate::clock::Clock;
use crate::config::ScriptwardenConfig;
use crate::crypto::obfuscate::decode_request_body;
use crate::policy::access::Keyring;
use crate::policy::catalog::ScriptCatalog;
use crate::protocol::models::VALIDATE_PATH;
use crate::storage::ScriptStore;
use crate::token::TokenStrategy;
use crate::ScriptwardenError;
use serde::de::DeserializeOwned;
use std::sync::Arc;

pub use authorize::AuthorizationService;
pub use validate::ValidationService;

/// Path of the authorization endpoint.
pub const AUTHORIZE_PATH: &str = "/authorize";

const BODY_PREVIEW_CHARS: usize = 200;

/// Pre-parse checks shared by both endpoints.
#[derive(Debug, Clone, Default)]
pub struct Gate {
    kill_switch: bool,
    required_user_agent: Option<String>,
}

impl Gate {
    /// Create a gate.
    pub fn new(kill_switch: bool, required_user_agent: Option<String>) -> Self {
        Self {
            kill_switch,
            required_user_agent,
        }
    }

    /// Whether the kill switch is engaged.
    pub fn kill_switch(&self) -> bool {
        self.kill_switch
    }

    /// Check the client, then the kill switch.
    pub fn admit(&self, client: &ClientInfo) -> Result<(), ScriptwardenError> {
        if let Some(required) = &self.required_user_agent {
            if client.user_agent.as_deref() != Some(required.as_str()) {
                return Err(ScriptwardenError::InvalidClient);
            }
        }
        if self.kill_switch {
            return Err(ScriptwardenError::KillSwitchActive);
        }
        Ok(())
    }
}

/// Everything the services share.
#[derive(Clone)]
pub struct ServiceContext {
    /// Script table.
    pub catalog: Arc<ScriptCatalog>,
    /// Key table.
    pub keyring: Arc<Keyring>,
    /// Script bodies and token state.
    pub store: Arc<dyn ScriptStore>,
    /// Session token implementation.
    pub tokens: Arc<dyn TokenStrategy>,
    /// Audit fan-out.
    pub audit: AuditDispatcher,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Client and kill-switch checks.
    pub gate: Gate,
    /// Request body XOR key.
    pub obfuscation_key: Arc<[u8]>,
}

impl ServiceContext {
    /// Build the tables from `config` and attach collaborators.
    pub fn new(
        config: &ScriptwardenConfig,
        store: Arc<dyn ScriptStore>,
        tokens: Arc<dyn TokenStrategy>,
        audit: AuditDispatcher,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ScriptwardenError> {
        let catalog = config.catalog()?;
        let keyring = config.keyring(&catalog)?;

        Ok(Self {
            catalog: Arc::new(catalog),
            keyring: Arc::new(keyring),
            store,
            tokens,
            audit,
            clock,
            gate: Gate::new(config.kill_switch, config.server.required_user_agent.clone()),
            obfuscation_key: Arc::from(config.obfuscation_key.as_bytes()),
        })
    }

    /// Run the gate, auditing every rejection.
    pub fn admit(&self, client: &ClientInfo, endpoint: &str) -> Result<(), ScriptwardenError> {
        let result = self.gate.admit(client);
        match &result {
            Err(ScriptwardenError::InvalidClient) => {
                tracing::warn!(
                    endpoint,
                    user_agent = client.user_agent.as_deref().unwrap_or("-"),
                    client_ip = %client.ip,
                    "rejecting unexpected client"
                );
                self.audit.emit(
                    self.event(AuditKind::InvalidClient, client)
                        .endpoint(endpoint),
                );
            }
            Err(ScriptwardenError::KillSwitchActive) => {
                tracing::warn!(endpoint, client_ip = %client.ip, "kill switch engaged, rejecting");
                self.audit.emit(
                    self.event(failure_kind(endpoint), client)
                        .reason("Global kill switch active")
                        .endpoint(endpoint),
                );
            }
            _ => {}
        }
        result
    }

    /// Audit event stamped with the current time.
    pub fn event(&self, kind: AuditKind, client: &ClientInfo) -> AuditEvent {
        AuditEvent::new(kind, client, self.clock.now_utc())
    }

    /// Decode and parse a request body, auditing a rejection.
    pub fn parse_body<T: DeserializeOwned>(
        &self,
        body: &[u8],
        client: &ClientInfo,
        endpoint: &str,
    ) -> Result<T, ScriptwardenError> {
        parse_body(body, &self.obfuscation_key).map_err(|e| self.reject_body(e, client, endpoint))
    }

    /// Audit a request whose body could not be read or parsed.
    pub fn reject_body(
        &self,
        err: ScriptwardenError,
        client: &ClientInfo,
        endpoint: &str,
    ) -> ScriptwardenError {
        let reason = match err {
            ScriptwardenError::BodyUnreadable => "Failed to read request body",
            _ => "Invalid JSON payload",
        };
        tracing::warn!(endpoint, client_ip = %client.ip, reason, "rejecting request body");
        self.audit.emit(
            self.event(failure_kind(endpoint), client)
                .reason(reason)
                .endpoint(endpoint),
        );
        err
    }
}

/// Failure event kind for `endpoint`.
pub fn failure_kind(endpoint: &str) -> AuditKind {
    if endpoint == VALIDATE_PATH {
        AuditKind::ValidateFail
    } else {
        AuditKind::AuthFail
    }
}

/// Decode a request body (plain or obfuscated JSON) into `T`.
///
/// # Errors
/// * `BodyUnreadable` - Body is not UTF-8
/// * `MalformedInput` - Body is not the expected JSON document
pub fn parse_body<T: DeserializeOwned>(body: &[u8], obfuscation_key: &[u8]) -> Result<T, ScriptwardenError> {
    let text = std::str::from_utf8(body).map_err(|_| ScriptwardenError::BodyUnreadable)?;
    let decoded = decode_request_body(text, obfuscation_key);

    serde_json::from_str(&decoded).map_err(|e| {
        let preview: String = decoded.chars().take(BODY_PREVIEW_CHARS).collect();
        tracing::debug!(error = %e, body = %preview, "rejecting request body");
        ScriptwardenError::MalformedInput(e.to_string())
    })
}

/// Fold a failure during token minting into `TokenIssue`.
pub(crate) fn issue_error(e: ScriptwardenError) -> ScriptwardenError {
    match e {
        ScriptwardenError::TokenIssue(_) => e,
        other => ScriptwardenError::TokenIssue(other.to_string()),
    }
}
