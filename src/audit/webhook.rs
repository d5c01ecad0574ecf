//! Discord-style webhook sink.
//!
//! Each event becomes one embed: a title and color per kind, inline fields
//! for who/what/where, and a footer carrying the timestamp.

use crate::audit::{AuditEvent, AuditKind, AuditSink, UNKNOWN};
use crate::ScriptwardenError;
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Footer prefix shown on every embed.
pub const FOOTER: &str = "Lunarity Auth System";

/// Posts audit events to a webhook URL.
pub struct WebhookSink {
    client: Client,
    url: String,
    user_agent: String,
}

impl WebhookSink {
    /// Create a sink posting to `url` with the given request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ScriptwardenError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScriptwardenError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            user_agent: build_user_agent(),
        })
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AuditSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn publish(&self, event: Arc<AuditEvent>) -> Result<(), ScriptwardenError> {
        let body = json!({ "embeds": [embed(&event)] });

        let response = self
            .client
            .post(&self.url)
            .header(USER_AGENT, &self.user_agent)
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ScriptwardenError::AuditTransport(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScriptwardenError::AuditTransport(format!(
                "Webhook answered {}",
                status.as_u16()
            )));
        }
        Ok(())
    }
}

/// `scriptwarden/<version>`
pub fn build_user_agent() -> String {
    format!("scriptwarden/{}", env!("CARGO_PKG_VERSION"))
}

fn title_and_color(kind: AuditKind) -> (&'static str, u32) {
    match kind {
        AuditKind::AuthSuccess => ("Authorization Success", 0x00ff00),
        AuditKind::AuthFail => ("Authorization Failed", 0xff0000),
        AuditKind::ValidateSuccess => ("Token Validated", 0x00aaff),
        AuditKind::ValidateFail => ("Validation Failed", 0xff6600),
        AuditKind::InvalidClient => ("Invalid Client Blocked", 0x8800ff),
    }
}

fn field(name: &str, value: impl Into<String>, inline: bool) -> Value {
    json!({ "name": name, "value": value.into(), "inline": inline })
}

fn code(value: &str) -> String {
    format!("`{}`", value)
}

fn user_line(event: &AuditEvent) -> String {
    format!(
        "{} ({})",
        event.username.as_deref().unwrap_or(UNKNOWN),
        event.user_id.as_deref().unwrap_or("N/A")
    )
}

/// Render an event as a webhook embed.
pub fn embed(event: &AuditEvent) -> Value {
    let (title, color) = title_and_color(event.kind);
    let reason = event.reason.as_deref().unwrap_or(UNKNOWN);
    let ip = field("IP", code(&event.client.ip), true);
    let country = field("Country", event.client.country.as_str(), true);

    let fields = match event.kind {
        AuditKind::AuthSuccess => vec![
            field("User", user_line(event), true),
            field("API Key", code(event.masked_key.as_deref().unwrap_or("...")), true),
            field("Script", event.script_id.as_deref().unwrap_or("Menu Only"), true),
            field("Place ID", event.place_id.as_deref().unwrap_or("N/A"), true),
            ip,
            country,
        ],
        AuditKind::AuthFail => vec![
            field("Reason", reason, false),
            field(
                "Attempted Key",
                code(event.masked_key.as_deref().unwrap_or("None...")),
                true,
            ),
            field("User", user_line(event), true),
            ip,
            country,
        ],
        AuditKind::ValidateSuccess => vec![
            field("Script", event.script_id.as_deref().unwrap_or(UNKNOWN), true),
            field("User", user_line(event), true),
            ip,
        ],
        AuditKind::ValidateFail => vec![
            field("Reason", reason, false),
            field("Script", event.script_id.as_deref().unwrap_or(UNKNOWN), true),
            ip,
            country,
        ],
        AuditKind::InvalidClient => vec![
            field(
                "User-Agent",
                code(event.client.user_agent.as_deref().unwrap_or("None")),
                false,
            ),
            field("Endpoint", event.endpoint.as_deref().unwrap_or(UNKNOWN), true),
            ip,
            country,
        ],
    };

    let timestamp = event.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    json!({
        "title": title,
        "color": color,
        "fields": fields,
        "footer": { "text": format!("{} • {}", FOOTER, timestamp) },
        "timestamp": timestamp,
    })
}
