//! Response envelopes and the error → HTTP mapping.
//!
//! The same error maps differently per endpoint: the kill switch is a 503 on
//! `/authorize` but a 403 carrying `killSwitch: true` on `/validate`, which
//! deployed loaders key off.

use crate::protocol::models::Failure;
use crate::ScriptwardenError;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// `content-type` of every JSON response.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// `content-type` of every text response.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// `cache-control` of every response.
pub const NO_STORE: &str = "no-store";

/// Which endpoint produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `POST /authorize`
    Authorize,
    /// `POST /validate`
    Validate,
}

/// Status and body for `err` raised by `endpoint`.
pub fn failure_for(endpoint: Endpoint, err: &ScriptwardenError) -> (StatusCode, Failure) {
    use ScriptwardenError as E;

    match (endpoint, err) {
        (_, E::InvalidClient) => (StatusCode::FORBIDDEN, Failure::new("Invalid client.")),
        (_, E::BodyUnreadable) => (
            StatusCode::BAD_REQUEST,
            Failure::new("Failed to read request body."),
        ),
        (_, E::MalformedInput(_)) => (StatusCode::BAD_REQUEST, Failure::new("Invalid JSON payload.")),

        (Endpoint::Authorize, E::KillSwitchActive) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Failure::new("Global kill switch active."),
        ),
        (Endpoint::Authorize, E::UnknownApiKey) => (
            StatusCode::UNAUTHORIZED,
            Failure::new("Unauthorized: invalid API key."),
        ),
        (Endpoint::Authorize, E::ScriptNotPermitted) => (
            StatusCode::FORBIDDEN,
            Failure::new("API key not permitted for this script."),
        ),
        (Endpoint::Authorize, E::ScriptDisabled) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Failure::new("Requested script is disabled."),
        ),
        (Endpoint::Authorize, E::ScriptBodyMissing { storage_key }) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Failure::new(format!("Script body missing in storage ({}).", storage_key)),
        ),
        (Endpoint::Authorize, E::TokenIssue(_)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Failure::new("Failed to issue session token."),
        ),

        (Endpoint::Validate, E::KillSwitchActive) => (
            StatusCode::FORBIDDEN,
            Failure::new("Kill switch active").kill_switch(),
        ),
        (Endpoint::Validate, E::TokenMissing) => (StatusCode::BAD_REQUEST, Failure::new("Token missing.")),
        (Endpoint::Validate, e) if e.is_token_rejection() => (
            StatusCode::UNAUTHORIZED,
            Failure::new("Token expired or invalid."),
        ),
        (Endpoint::Validate, E::ScriptMismatch) => {
            (StatusCode::FORBIDDEN, Failure::new("Token/script mismatch."))
        }
        (Endpoint::Validate, E::TokenIssue(_)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Failure::new("Failed to rotate session token."),
        ),
        (Endpoint::Validate, E::StorageIO(_)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Failure::new("Failed to look up session token."),
        ),

        (_, other) => {
            tracing::error!(?endpoint, error = %other, "unmapped service error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Failure::new("Internal server error."),
            )
        }
    }
}

/// Pretty-printed JSON with the standard headers.
pub fn json<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_string_pretty(body) {
        Ok(text) => (
            status,
            [(CONTENT_TYPE, JSON_CONTENT_TYPE), (CACHE_CONTROL, NO_STORE)],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Plain text with the standard headers.
pub fn text(status: StatusCode, body: String) -> Response {
    (
        status,
        [(CONTENT_TYPE, TEXT_CONTENT_TYPE), (CACHE_CONTROL, NO_STORE)],
        body,
    )
        .into_response()
}

/// JSON refusal for `err` raised by `endpoint`.
pub fn failure(endpoint: Endpoint, err: &ScriptwardenError) -> Response {
    let (status, body) = failure_for(endpoint, err);
    json(status, &body)
}

/// `404 {ok:false, reason:"Not found"}`
pub fn not_found() -> Response {
    json(StatusCode::NOT_FOUND, &Failure::new("Not found"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn check(endpoint: Endpoint, err: ScriptwardenError, status: StatusCode, reason: &str) {
        let (got_status, body) = failure_for(endpoint, &err);
        assert_eq!(got_status, status, "{:?}", err);
        assert_eq!(body.reason, reason);
        assert!(!body.ok);
    }

    #[test]
    fn test_authorize_mapping() {
        use ScriptwardenError as E;
        let a = Endpoint::Authorize;
        check(a, E::KillSwitchActive, StatusCode::SERVICE_UNAVAILABLE, "Global kill switch active.");
        check(a, E::BodyUnreadable, StatusCode::BAD_REQUEST, "Failed to read request body.");
        check(a, E::MalformedInput("x".into()), StatusCode::BAD_REQUEST, "Invalid JSON payload.");
        check(a, E::UnknownApiKey, StatusCode::UNAUTHORIZED, "Unauthorized: invalid API key.");
        check(
            a,
            E::ScriptNotPermitted,
            StatusCode::FORBIDDEN,
            "API key not permitted for this script.",
        );
        check(a, E::ScriptDisabled, StatusCode::SERVICE_UNAVAILABLE, "Requested script is disabled.");
        check(
            a,
            E::ScriptBodyMissing {
                storage_key: "DoorESP.lua".into(),
            },
            StatusCode::INTERNAL_SERVER_ERROR,
            "Script body missing in storage (DoorESP.lua).",
        );
        check(
            a,
            E::TokenIssue("x".into()),
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to issue session token.",
        );
        check(a, E::InvalidClient, StatusCode::FORBIDDEN, "Invalid client.");
    }

    #[test]
    fn test_validate_mapping() {
        use ScriptwardenError as E;
        let v = Endpoint::Validate;
        check(v, E::TokenMissing, StatusCode::BAD_REQUEST, "Token missing.");
        check(v, E::TokenMalformed, StatusCode::UNAUTHORIZED, "Token expired or invalid.");
        check(v, E::TokenInvalid, StatusCode::UNAUTHORIZED, "Token expired or invalid.");
        check(
            v,
            E::TokenExpired {
                expired_at: Utc::now(),
            },
            StatusCode::UNAUTHORIZED,
            "Token expired or invalid.",
        );
        check(v, E::ScriptMismatch, StatusCode::FORBIDDEN, "Token/script mismatch.");
        check(
            v,
            E::TokenIssue("x".into()),
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to rotate session token.",
        );
        check(v, E::MalformedInput("x".into()), StatusCode::BAD_REQUEST, "Invalid JSON payload.");
        check(
            v,
            E::StorageIO("disk".into()),
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to look up session token.",
        );
    }

    #[test]
    fn test_validate_kill_switch_flag() {
        let (status, body) = failure_for(Endpoint::Validate, &ScriptwardenError::KillSwitchActive);
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.reason, "Kill switch active");
        assert_eq!(body.kill_switch, Some(true));

        let (_, body) = failure_for(Endpoint::Authorize, &ScriptwardenError::KillSwitchActive);
        assert_eq!(body.kill_switch, None);
    }

    #[test]
    fn test_json_headers() {
        let response = json(StatusCode::OK, &serde_json::json!({"ok": true}));
        assert_eq!(response.headers()[CONTENT_TYPE], JSON_CONTENT_TYPE);
        assert_eq!(response.headers()[CACHE_CONTROL], NO_STORE);
    }

    #[test]
    fn test_text_headers() {
        let response = text(StatusCode::SERVICE_UNAVAILABLE, "-- nope".to_string());
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[CONTENT_TYPE], TEXT_CONTENT_TYPE);
    }
}
