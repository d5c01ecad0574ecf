//! Scriptwarden server binary.

use anyhow::Context;
use clap::Parser;
use scriptwarden::{build_router, AppState, ScriptwardenConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "scriptwarden=info,tower_http=info";

/// API-key gated script delivery server.
#[derive(Parser, Debug)]
#[command(name = "scriptwarden", version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "SCRIPTWARDEN_CONFIG", default_value = "scriptwarden.toml")]
    config: PathBuf,

    /// Listen address, overriding `server.bind`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "SCRIPTWARDEN_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    init_tracing(args.log_json);

    let mut config = ScriptwardenConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
        config.validate()?;
    }

    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::from_config(&config)?);
    let sweeper = state.start_sweeper(config.storage.sweep_interval());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!(%addr, kill_switch = config.kill_switch, "scriptwarden listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    tracing::info!("scriptwarden stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
