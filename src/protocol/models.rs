//! Request and response bodies for the HTTP surface.

use crate::policy::catalog::ScriptSummary;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Path clients use to revalidate.
pub const VALIDATE_PATH: &str = "/validate";

/// `POST /authorize` body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    /// Presented API key. Trimmed before lookup.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Caller's user id, string or number.
    #[serde(default)]
    pub user_id: Option<Value>,

    /// Caller's display name.
    #[serde(default)]
    pub username: Option<String>,

    /// Caller's place id, string or number.
    #[serde(default)]
    pub place_id: Option<Value>,

    /// Requested script.
    #[serde(default)]
    pub script_id: Option<String>,

    /// Older clients send the script id here.
    #[serde(default)]
    pub script: Option<String>,
}

impl AuthorizeRequest {
    /// Requested script id, preferring `scriptId` over `script`.
    pub fn requested_script(&self) -> Option<&str> {
        non_empty(self.script_id.as_deref()).or_else(|| non_empty(self.script.as_deref()))
    }

    /// Presented key, or `""` when absent.
    pub fn api_key(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }

    /// User id rendered as text.
    pub fn user_id_text(&self) -> Option<String> {
        self.user_id.as_ref().and_then(value_text)
    }

    /// Place id rendered as text.
    pub fn place_id_text(&self) -> Option<String> {
        self.place_id.as_ref().and_then(value_text)
    }
}

/// `POST /validate` body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    /// Session token. Trimmed before use.
    #[serde(default)]
    pub token: Option<String>,

    /// Script the caller believes the token is for.
    #[serde(default)]
    pub script_id: Option<String>,

    /// `false` asks for an extension instead of a rotation, when allowed.
    #[serde(default)]
    pub refresh: Option<bool>,
}

impl ValidateRequest {
    /// Trimmed token, `None` when absent or blank.
    pub fn token(&self) -> Option<&str> {
        non_empty(self.token.as_deref().map(str::trim))
    }

    /// Expected script id, `None` when absent or blank.
    pub fn expected_script(&self) -> Option<&str> {
        non_empty(self.script_id.as_deref())
    }
}

/// Echo of who asked.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    /// Label of the API key.
    pub label: String,
    /// As sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Value>,
    /// As sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// As sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub place_id: Option<Value>,
}

/// Script body and session token handed out with a grant.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptGrant {
    /// Script body, obfuscated when `script_encrypted`.
    pub script: String,
    /// Whether `script` is obfuscated.
    pub script_encrypted: bool,
    /// Catalog entry of the granted script.
    pub script_meta: ScriptSummary,
    /// Session token.
    pub access_token: String,
    /// Token lifetime in seconds.
    pub expires_in: u64,
    /// Where to revalidate.
    pub validate_path: &'static str,
}

/// `POST /authorize` success body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeResponse {
    /// Always `true`.
    pub ok: bool,
    /// Always `Authorization OK`.
    pub message: &'static str,
    /// Scripts the key may fetch.
    pub scripts: Vec<ScriptSummary>,
    /// Who asked.
    pub actor: Actor,
    /// Present when a script was requested.
    #[serde(flatten)]
    pub grant: Option<ScriptGrant>,
}

impl AuthorizeResponse {
    /// A menu-only response.
    pub fn menu(scripts: Vec<ScriptSummary>, actor: Actor) -> Self {
        Self {
            ok: true,
            message: "Authorization OK",
            scripts,
            actor,
            grant: None,
        }
    }

    /// Attach a script grant.
    pub fn with_grant(mut self, grant: ScriptGrant) -> Self {
        self.grant = Some(grant);
        self
    }
}

/// `POST /validate` success body.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    /// Always `true`.
    pub ok: bool,
    /// Script the token is bound to.
    pub script_id: String,
    /// Remaining lifetime in seconds.
    pub expires_in: u64,
    /// Replacement token, when rotated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_token: Option<String>,
}

/// Any refusal.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    /// Always `false`.
    pub ok: bool,
    /// Stable, human-readable reason.
    pub reason: String,
    /// Set when the kill switch caused the refusal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kill_switch: Option<bool>,
}

impl Failure {
    /// Refusal with `reason`.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: reason.into(),
            kill_switch: None,
        }
    }

    /// Mark as a kill-switch refusal.
    pub fn kill_switch(mut self) -> Self {
        self.kill_switch = Some(true);
        self
    }
}

/// `/health` body.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Health {
    /// Always `true`.
    pub ok: bool,
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

/// Text form of a loosely typed id: strings as-is, numbers in decimal.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
