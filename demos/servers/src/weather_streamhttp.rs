mod common;
use std::{net::IpAddr, time::Duration};

use clap::Parser;
use common::weather::weather_server;
use mcp_session::transport::{StreamableHttpServerConfig, StreamableHttpService};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "weather-streamhttp")]
#[command(about = "Demo MCP server with weather tools over Streamable HTTP")]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "MCP_BIND", default_value = "127.0.0.1")]
    bind: IpAddr,

    #[arg(long, env = "MCP_PORT", default_value_t = 4005)]
    port: u16,

    /// Route of the MCP endpoint
    #[arg(long, default_value = StreamableHttpServerConfig::DEFAULT_PATH)]
    path: String,

    /// Close sessions idle for this many seconds
    #[arg(long)]
    idle_timeout_secs: Option<u64>,

    /// Switch slow POST answers to SSE after this many milliseconds
    #[arg(long, default_value_t = 5000)]
    sse_upgrade_after_ms: u64,

    /// Extra allowed CORS origin prefix (repeatable)
    #[arg(long = "allow-origin")]
    allow_origin: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let mut config = StreamableHttpServerConfig {
        path: cli.path,
        session_idle_timeout: cli.idle_timeout_secs.map(Duration::from_secs),
        sse_upgrade_after: Some(Duration::from_millis(cli.sse_upgrade_after_ms)),
        ..Default::default()
    };
    config.allowed_origin_prefixes.extend(cli.allow_origin);

    let service = StreamableHttpService::new(weather_server()?, config);
    let router = service.router();
    let listener = tokio::net::TcpListener::bind((cli.bind, cli.port)).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        path = %service.config().path,
        "weather server listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!(%error, "failed to listen for shutdown signal");
            }
        })
        .await?;

    service.registry().close_all().await;
    tracing::info!("weather server stopped");
    Ok(())
}
