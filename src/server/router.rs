//! Application state and route table.

use crate::audit::{AuditDispatcher, AuditSink, WebhookSink};
use crate::clock::{Clock, SystemClock};
use crate::config::{ScriptwardenConfig, StorageBackend};
use crate::server::handlers;
use crate::service::{AuthorizationService, ServiceContext, ValidationService};
use crate::storage::{spawn_sweeper, FileStore, MemoryStore, ScriptStore};
use crate::token::build_strategy;
use crate::ScriptwardenError;
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::middleware::{from_fn, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, post};
use axum::Router;
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

/// Data directory namespace used when no storage dir is configured.
pub const DATA_NAMESPACE: &str = "scriptwarden";

/// State shared by every handler.
pub struct AppState {
    /// `/authorize` logic.
    pub authorize: AuthorizationService,
    /// `/validate` logic.
    pub validate: ValidationService,
    /// Backing store for text resources.
    pub store: Arc<dyn ScriptStore>,
    /// Storage key of the loader.
    pub loader_key: String,
    /// Extra text resources by path.
    pub public_modules: IndexMap<String, String>,
}

impl AppState {
    /// Build everything from configuration, using the system clock.
    pub fn from_config(config: &ScriptwardenConfig) -> Result<Self, ScriptwardenError> {
        Self::from_config_with_clock(config, Arc::new(SystemClock))
    }

    /// Build everything from configuration with a custom clock.
    pub fn from_config_with_clock(
        config: &ScriptwardenConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ScriptwardenError> {
        let store: Arc<dyn ScriptStore> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryStore::new(clock.clone())),
            StorageBackend::File => match &config.storage.dir {
                Some(dir) => Arc::new(FileStore::new(dir.clone(), clock.clone())?),
                None => Arc::new(FileStore::in_data_dir(DATA_NAMESPACE, clock.clone())?),
            },
        };

        let mut sinks: Vec<Arc<dyn AuditSink>> = Vec::new();
        if let Some(url) = &config.audit.webhook_url {
            sinks.push(Arc::new(WebhookSink::new(url.clone(), config.audit.timeout())?));
        }

        Self::assemble(config, store, AuditDispatcher::new(sinks), clock)
    }

    /// Build from configuration around caller-supplied collaborators.
    pub fn assemble(
        config: &ScriptwardenConfig,
        store: Arc<dyn ScriptStore>,
        audit: AuditDispatcher,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ScriptwardenError> {
        config.validate()?;

        let tokens = build_strategy(&config.token, &config.signing_secret, store.clone(), clock.clone())?;
        tracing::info!(
            strategy = tokens.name(),
            store = store.name(),
            audit_sinks = audit.sink_count(),
            scripts = config.scripts.len(),
            api_keys = config.api_keys.len(),
            kill_switch = config.kill_switch,
            "scriptwarden state assembled"
        );

        let ctx = ServiceContext::new(config, store.clone(), tokens, audit, clock)?;

        Ok(Self {
            authorize: AuthorizationService::new(ctx.clone(), config),
            validate: ValidationService::new(ctx, config),
            store,
            loader_key: config.server.loader_key.clone(),
            public_modules: config.server.public_modules.clone(),
        })
    }

    /// Start the periodic sweep of expired storage entries.
    pub fn start_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        tracing::info!(store = self.store.name(), interval_secs = interval.as_secs(), "expired entry sweeper started");
        spawn_sweeper(self.store.clone(), interval)
    }
}

/// Route table.
///
/// `OPTIONS` on any path answers 204 before routing. Unknown paths and
/// unsupported methods on known paths answer the JSON 404.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/", any(handlers::loader))
        .route("/loader", any(handlers::loader))
        .route(
            "/authorize",
            post(handlers::authorize).fallback(handlers::not_found),
        )
        .route(
            "/validate",
            post(handlers::validate).fallback(handlers::not_found),
        )
        .route("/health", any(handlers::health));

    for path in state.public_modules.keys() {
        router = router.route(path, any(handlers::public_module));
    }

    router
        .fallback(handlers::not_found)
        .layer(from_fn(preflight))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn preflight(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    next.run(req).await
}
