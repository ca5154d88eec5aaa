//! Headless server entry point: wires the persistence layer, the C4-C12
//! services, and the HTTP/WebSocket surface, then runs until shutdown.

use anyhow::{Context, Result};
use marketcore::composition;
use marketcore::config::Config;
use marketcore::interfaces::http::{router, AppState};
use tracing::{info, Level};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("failed to load configuration")?;
    info!(bind_addr = %config.http_bind_addr, "marketcore server starting");

    let ctx = composition::build(&config).await?;
    ctx.event_bus.subscribe(ctx.scheduler.clone()).await;
    ctx.event_bus.subscribe(ctx.bbw_monitor.clone()).await;

    let state = AppState {
        metrics: ctx.metrics,
        orchestrator: ctx.orchestrator,
        scheduler: ctx.scheduler,
        broadcast_hub: ctx.broadcast_hub,
    };

    let listener = tokio::net::TcpListener::bind(&config.http_bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_bind_addr))?;
    info!(bind_addr = %config.http_bind_addr, "http server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server exited with an error")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
