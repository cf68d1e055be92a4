#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Context;
use everbrowser_core::{AgentSlot, Orchestrator};
use everbrowser_server::{bootstrap, config::ServerConfig, router};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing logger
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,everbrowser_server=debug,everbrowser_core=debug".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    tracing::info!("--- everBrowser Daemon ---");

    let config = ServerConfig::load()?;
    let slot = AgentSlot::new();
    let orchestrator = Arc::new(Orchestrator::new(config.orchestrator.clone(), slot.clone())?);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind to {}", address))?;

    // Serve /health while the agent starts up
    bootstrap::spawn_bootstrap(config, slot);

    tracing::info!("everBrowser daemon running on http://{}", address);

    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("everBrowser daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
