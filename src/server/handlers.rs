//! Axum handlers.

use crate::audit::{ClientInfo, UNKNOWN};
use crate::protocol::models::Health;
use crate::server::response::{self, Endpoint};
use crate::server::router::AppState;
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::Response;
use std::sync::Arc;

/// Client metadata from edge-proxy headers.
///
/// IP: `cf-connecting-ip`, then the first `x-forwarded-for` hop, then
/// `x-real-ip`. Country: `cf-ipcountry`.
pub fn client_info(headers: &HeaderMap) -> ClientInfo {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let ip = header("cf-connecting-ip")
        .or_else(|| header("x-forwarded-for").and_then(|v| v.split(',').next()).map(str::trim))
        .or_else(|| header("x-real-ip"))
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN);

    ClientInfo {
        ip: ip.to_string(),
        country: header("cf-ipcountry").unwrap_or(UNKNOWN).to_string(),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

/// `POST /authorize`
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let client = client_info(&headers);
    let result = match body {
        Ok(body) => state.authorize.authorize(&body, &client).await,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "failed to read authorize body");
            Err(state.authorize.reject_unreadable(&client))
        }
    };

    match result {
        Ok(grant) => response::json(StatusCode::OK, &grant),
        Err(e) => response::failure(Endpoint::Authorize, &e),
    }
}

/// `POST /validate`
pub async fn validate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let client = client_info(&headers);
    let result = match body {
        Ok(body) => state.validate.validate(&body, &client).await,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "failed to read validate body");
            Err(state.validate.reject_unreadable(&client))
        }
    };

    match result {
        Ok(renewed) => response::json(StatusCode::OK, &renewed),
        Err(e) => response::failure(Endpoint::Validate, &e),
    }
}

/// `/` and `/loader`
pub async fn loader(State(state): State<Arc<AppState>>) -> Response {
    serve_text(&state, &state.loader_key, "Loader").await
}

/// Configured public module paths.
pub async fn public_module(State(state): State<Arc<AppState>>, uri: Uri) -> Response {
    match state.public_modules.get(uri.path()) {
        Some(key) => serve_text(&state, key, "Module").await,
        None => response::not_found(),
    }
}

/// `/health`
pub async fn health() -> Response {
    response::json(StatusCode::OK, &Health { ok: true })
}

/// Anything unrouted.
pub async fn not_found() -> Response {
    response::not_found()
}

async fn serve_text(state: &AppState, key: &str, what: &str) -> Response {
    match state.store.get_text(key).await {
        Ok(Some(source)) if !source.is_empty() => response::text(StatusCode::OK, source),
        outcome => {
            if let Err(e) = outcome {
                tracing::error!(storage_key = key, error = %e, "text resource fetch failed");
            } else {
                tracing::warn!(storage_key = key, "text resource not uploaded");
            }
            response::text(
                StatusCode::SERVICE_UNAVAILABLE,
                format!("-- {} not uploaded to storage (key: {})", what, key),
            )
        }
    }
}
