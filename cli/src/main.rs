//! `llamagate`: an OpenAI-compatible gateway for a local Ollama instance
//! with MCP tool, resource, and prompt federation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use llamagate_core::AppState;
use llamagate_core::Config;
use llamagate_core::ProxyEngine;
use llamagate_core::config::McpConfig;
use llamagate_core::config::McpServerConfig;
use llamagate_core::configure_app;
use llamagate_core::ollama::OllamaClient;
use llamagate_mcp_client::HttpEndpoint;
use llamagate_mcp_client::HttpTransport;
use llamagate_mcp_client::McpClient;
use llamagate_mcp_client::PoolConfig;
use llamagate_mcp_client::ServerManager;
use llamagate_mcp_client::ServerTransport;
use llamagate_mcp_client::StdioTransport;
use tokio::task::JoinSet;
use tracing::info;
use tracing::warn;

#[derive(Debug, Parser)]
#[command(name = "llamagate", about = "OpenAI-compatible gateway for Ollama with MCP federation")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, env = "LLAMAGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address, e.g. 0.0.0.0.
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Base URL of the Ollama server.
    #[arg(long)]
    ollama_host: Option<String>,

    /// Shared secret for X-API-Key / bearer authentication.
    #[arg(long)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llamagate=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(ollama_host) = cli.ollama_host {
        config.ollama_host = ollama_host;
    }
    if let Some(api_key) = cli.api_key {
        config.api_key = Some(api_key);
    }

    let manager = start_mcp_servers(&config.mcp).await;

    let mut proxy = ProxyEngine::new(OllamaClient::new(config.ollama_host.clone()))
        .with_cache(config.cache.enabled, config.cache.max_entries)
        .with_tool_config(config.tools.to_loop_config())
        .with_resource_fetch_timeout(Duration::from_secs(config.mcp.resource_fetch_timeout_secs));
    if let Some(manager) = &manager {
        proxy = proxy.with_mcp(manager.clone());
    }

    let state = AppState::new(Arc::new(proxy))
        .with_api_key(config.api_key.clone())
        .with_rate_limit(config.rate_limit);
    let app = configure_app(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        addr = %addr,
        ollama = %config.ollama_host,
        mcp_servers = manager.as_ref().map(|m| m.list_servers().len()).unwrap_or(0),
        "llamagate listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(manager) = manager {
        manager.close().await;
    }
    info!("llamagate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}

/// Spawn and initialize every configured MCP server concurrently. Servers
/// that fail to come up are logged and skipped; the gateway still starts.
async fn start_mcp_servers(config: &McpConfig) -> Option<Arc<ServerManager>> {
    if !config.enabled {
        return None;
    }

    let manager = ServerManager::new(
        Duration::from_secs(config.metadata_ttl_secs),
        Duration::from_secs(config.health_interval_secs),
        Duration::from_secs(config.health_timeout_secs),
    );

    let mut join_set = JoinSet::new();
    for server in config.servers.clone() {
        join_set.spawn(async move {
            let connected = connect_server(&server).await;
            (server.name, connected)
        });
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((name, Ok((client, transport)))) => {
                if let Err(e) = manager.add_server(&name, client, transport) {
                    warn!(server = %name, "failed to register mcp server: {e:#}");
                }
            }
            Ok((name, Err(e))) => {
                warn!(server = %name, "failed to start mcp server: {e:#}");
            }
            Err(e) => warn!("mcp startup task panicked: {e}"),
        }
    }

    Some(manager)
}

async fn connect_server(config: &McpServerConfig) -> Result<(McpClient, ServerTransport)> {
    if let Some(command) = &config.command {
        let transport = StdioTransport::open(command, &config.args, Some(config.env.clone()))
            .await
            .with_context(|| format!("failed to spawn {command}"))?;
        let client = McpClient::new(&config.name, Arc::new(transport));
        client.initialize().await?;
        client.discover().await;
        return Ok((client, ServerTransport::Stdio));
    }

    let url = config
        .url
        .as_ref()
        .context("server has neither command nor url")?;
    let endpoint = HttpEndpoint {
        url: url.clone(),
        headers: config.headers.clone(),
        timeout: config.timeout_secs.map(Duration::from_secs),
    };
    let transport = HttpTransport::open(&endpoint)?;
    let client = McpClient::new(&config.name, Arc::new(transport));
    client.initialize().await?;
    client.discover().await;
    let pool = PoolConfig {
        max_size: config.pool_max_size,
        max_idle: Duration::from_secs(config.pool_max_idle_secs),
        acquire_timeout: Duration::from_secs(config.pool_acquire_timeout_secs),
    };
    Ok((client, ServerTransport::Http { endpoint, pool }))
}
