mod cache;
mod clock;
mod config;
mod constants;
mod context;
mod error;
mod formatters;
mod health;
mod http;
mod metrics;
mod models;
mod probes;
mod rate_limiter;
mod service;
mod task;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use rmcp::ServiceExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerSettings;
use crate::context::AppContext;
use crate::service::Weather;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mcp_weather_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let settings = ServerSettings::parse();
    tracing::info!(
        name = %settings.server_name,
        version = %settings.server_version,
        "Starting MCP weather server"
    );

    let ctx = Arc::new(AppContext::new(settings)?);
    ctx.start();

    let served = serve(Weather::new(ctx.clone())).await;
    if let Err(e) = &served {
        tracing::error!("MCP server stopped with error: {:#}", e);
    }

    ctx.shutdown().await;
    tracing::info!("Server shutdown complete");
    served
}

async fn serve(weather: Weather) -> Result<()> {
    let server = weather.serve(rmcp::transport::stdio()).await?;
    server.waiting().await?;
    Ok(())
}
