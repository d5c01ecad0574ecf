//! Best-effort audit trail.
//!
//! Services build an [`AuditEvent`] for every terminal outcome and hand it to
//! the [`AuditDispatcher`]. The dispatcher logs it through `tracing` and then
//! publishes it to each configured [`AuditSink`] on its own spawned task. Sink
//! failures are logged and dropped; callers never wait on delivery.

pub mod webhook;

use crate::ScriptwardenError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

pub use webhook::WebhookSink;

/// Placeholder for client metadata that was not supplied.
pub const UNKNOWN: &str = "Unknown";

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A key was authorized, with or without a script grant.
    AuthSuccess,
    /// An authorization attempt was refused.
    AuthFail,
    /// A session token was validated.
    ValidateSuccess,
    /// A session token was refused.
    ValidateFail,
    /// A request came from a client other than the required one.
    InvalidClient,
}

impl AuditKind {
    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthSuccess => "auth_success",
            Self::AuthFail => "auth_fail",
            Self::ValidateSuccess => "validate_success",
            Self::ValidateFail => "validate_fail",
            Self::InvalidClient => "invalid_client",
        }
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a request came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    /// Client IP as reported by the edge, or `Unknown`.
    pub ip: String,
    /// Two-letter country as reported by the edge, or `Unknown`.
    pub country: String,
    /// User-Agent header, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            ip: UNKNOWN.to_string(),
            country: UNKNOWN.to_string(),
            user_agent: None,
        }
    }
}

/// One audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Event kind.
    pub kind: AuditKind,

    /// When the outcome was decided.
    pub timestamp: DateTime<Utc>,

    /// Request origin.
    pub client: ClientInfo,

    /// Why the request was refused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Presented API key, truncated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masked_key: Option<String>,

    /// Script involved, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_id: Option<String>,

    /// Script the token was actually bound to, on a mismatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_script_id: Option<String>,

    /// Subject id as sent by the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Subject name as sent by the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Place id as sent by the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,

    /// Endpoint path, for client-check failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl AuditEvent {
    /// Start an event of `kind` for a request from `client`.
    pub fn new(kind: AuditKind, client: &ClientInfo, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            timestamp,
            client: client.clone(),
            reason: None,
            masked_key: None,
            script_id: None,
            expected_script_id: None,
            user_id: None,
            username: None,
            place_id: None,
            endpoint: None,
        }
    }

    /// Attach a refusal reason.
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attach the presented key, keeping only its first `visible` characters.
    pub fn api_key(mut self, key: &str, visible: usize) -> Self {
        self.masked_key = Some(mask_key(key, visible));
        self
    }

    /// Attach the script id.
    pub fn script(mut self, script_id: Option<&str>) -> Self {
        self.script_id = script_id.map(str::to_string);
        self
    }

    /// Attach the script the token was bound to.
    pub fn expected_script(mut self, script_id: &str) -> Self {
        self.expected_script_id = Some(script_id.to_string());
        self
    }

    /// Attach caller-supplied subject fields.
    pub fn subject(
        mut self,
        user_id: Option<String>,
        username: Option<String>,
        place_id: Option<String>,
    ) -> Self {
        self.user_id = user_id;
        self.username = username;
        self.place_id = place_id;
        self
    }

    /// Attach the endpoint path.
    pub fn endpoint(mut self, path: &str) -> Self {
        self.endpoint = Some(path.to_string());
        self
    }
}

/// First `visible` characters of `key` followed by `...`.
pub fn mask_key(key: &str, visible: usize) -> String {
    let prefix: String = key.chars().take(visible).collect();
    format!("{}...", prefix)
}

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Short sink name for logs.
    fn name(&self) -> &str;

    /// Deliver one event.
    async fn publish(&self, event: Arc<AuditEvent>) -> Result<(), ScriptwardenError>;
}

/// Fans audit events out to sinks without blocking the caller.
#[derive(Clone, Default)]
pub struct AuditDispatcher {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl AuditDispatcher {
    /// Dispatch to the given sinks.
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }

    /// A dispatcher that only logs.
    pub fn log_only() -> Self {
        Self::default()
    }

    /// Number of attached sinks.
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Record an event. Returns immediately.
    ///
    /// Must be called from within a Tokio runtime when sinks are attached.
    pub fn emit(&self, event: AuditEvent) {
        tracing::info!(
            target: "scriptwarden::audit",
            kind = %event.kind,
            script_id = event.script_id.as_deref().unwrap_or("-"),
            reason = event.reason.as_deref().unwrap_or("-"),
            client_ip = %event.client.ip,
            country = %event.client.country,
            "audit event"
        );

        if self.sinks.is_empty() {
            return;
        }

        let event = Arc::new(event);
        for sink in &self.sinks {
            let sink = Arc::clone(sink);
            let event = Arc::clone(&event);
            tokio::spawn(async move {
                if let Err(e) = sink.publish(event).await {
                    tracing::warn!(sink = sink.name(), error = %e, "audit sink publish failed");
                }
            });
        }
    }
}

/// In-memory sink that keeps every event it receives.
#[cfg(any(test, feature = "test-seams"))]
#[derive(Default)]
pub struct MemorySink {
    events: std::sync::Mutex<Vec<Arc<AuditEvent>>>,
}

#[cfg(any(test, feature = "test-seams"))]
impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far.
    pub fn events(&self) -> Vec<Arc<AuditEvent>> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Kinds received so far, in order.
    pub fn kinds(&self) -> Vec<AuditKind> {
        self.events().iter().map(|e| e.kind).collect()
    }

    /// Wait (yielding to the runtime) until at least `count` events arrived.
    pub async fn wait_for(&self, count: usize) -> Vec<Arc<AuditEvent>> {
        for _ in 0..100 {
            let events = self.events();
            if events.len() >= count {
                return events;
            }
            tokio::task::yield_now().await;
        }
        self.events()
    }
}

#[cfg(any(test, feature = "test-seams"))]
#[async_trait]
impl AuditSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, event: Arc<AuditEvent>) -> Result<(), ScriptwardenError> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
        Ok(())
    }
}
