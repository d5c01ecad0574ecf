//! # Scriptwarden
//!
//! **API-key gated script delivery with short-lived, rotating session tokens.**
//!
//! Scriptwarden sits in front of a store of text payloads ("scripts"). A
//! client presents an API key to `POST /authorize` and receives the scripts
//! it may fetch, plus, when it asks for one, the script body and a session
//! token. The client then calls `POST /validate` periodically; every
//! successful validation hands back a replacement token and retires the old
//! one.
//!
//! ## Features
//!
//! - **HMAC-SHA256 signed tokens**: self-contained, verified with only the signing secret
//! - **Rotation on validation**: a validated token is consumed and cannot be replayed
//! - **Stored-token variant**: opaque random tokens with a storage record
//! - **Per-key allow-lists**: keys see only the scripts they are granted
//! - **Kill switch**: one flag refuses every authorization and validation
//! - **Best-effort audit**: Discord-style webhook embeds, never blocking a request
//!
//! ## Quickstart
//!
//! ```no_run
//! use scriptwarden::{build_router, AppState, ScriptwardenConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ScriptwardenConfig::load("scriptwarden.toml".as_ref())?;
//!     let state = Arc::new(AppState::from_config(&config)?);
//!
//!     let listener = tokio::net::TcpListener::bind(config.bind_addr()?).await?;
//!     axum::serve(listener, build_router(state)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Threat Model
//!
//! Scriptwarden protects against:
//! - **Forged tokens**: any change to a signed token's payload or MAC is rejected
//! - **Token replay**: a rotated token is remembered until it would have expired
//! - **Cross-script reuse**: a token bound to one script is refused for another
//!
//! Request-body obfuscation is a scraping deterrent, not encryption. API keys
//! are compared as plain strings.
//!
//! See [`ScriptwardenConfig`] for the full configuration surface.

#![warn(missing_docs)]

// Core modules
pub mod clock;
pub mod config;
pub mod errors;

// Crypto layer
pub mod crypto;

// Policy layer
pub mod policy;

// Token layer
pub mod token;

// Collaborators
pub mod audit;
pub mod storage;

// Wire formats
pub mod protocol;

// Services and HTTP surface
pub mod server;
pub mod service;

// Re-exports for public API
pub use audit::{AuditDispatcher, AuditEvent, AuditKind, AuditSink, ClientInfo};
pub use clock::{Clock, SystemClock};
pub use config::ScriptwardenConfig;
pub use errors::ScriptwardenError;
pub use server::{build_router, AppState};
pub use service::{AuthorizationService, ValidationService};
pub use storage::{FileStore, MemoryStore, ScriptStore};
pub use token::{SessionClaims, TokenStrategy};

#[cfg(any(test, feature = "test-seams"))]
pub use audit::MemorySink;
#[cfg(any(test, feature = "test-seams"))]
pub use clock::MockClock;
