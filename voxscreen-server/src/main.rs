//! Voxscreen interview media server.
//!
//! Accepts one WebSocket per candidate, runs an `InterviewSession` behind it
//! and closes every live connection on Ctrl-C or SIGTERM.

mod media;
mod routes;
mod scripts;
mod settings;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use voxscreen_core::SessionRegistry;

use scripts::ScriptStore;
use settings::{default_settings_path, load_settings};
use state::{build_services, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("voxscreen=info,tower_http=info")),
        )
        .init();

    let settings_path = std::env::var_os("VOXSCREEN_SETTINGS")
        .map(PathBuf::from)
        .unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    settings.apply_env_overrides();
    info!(path = ?settings_path, bind = %settings.bind_address, "voxscreen starting");

    let services = build_services(&settings)?;
    let scripts = ScriptStore::load(&settings.scripts_path)?;
    let registry = Arc::new(SessionRegistry::new());
    let state = AppState::new(services, settings.session_config(), scripts, Arc::clone(&registry));

    let listener = TcpListener::bind(&settings.bind_address)
        .await
        .with_context(|| format!("binding {}", settings.bind_address))?;
    info!(addr = %listener.local_addr()?, "listening");

    // Upgraded sockets keep the server alive, so close them before axum
    // waits for in-flight connections.
    let shutdown_registry = Arc::clone(&registry);
    axum::serve(listener, routes::create_router(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_registry.close_all().await;
        })
        .await
        .context("server error")?;

    registry.close_all().await;
    info!("voxscreen stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
