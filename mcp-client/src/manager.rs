//! Composition root for the MCP client fabric.
//!
//! The [`ServerManager`] owns one session per configured server (keyed by
//! the server name), a shared health monitor, a shared metadata cache, and
//! a connection pool per HTTP-backed server. Callers borrow clients via
//! [`get_client`](ServerManager::get_client) /
//! [`release_client`](ServerManager::release_client); stdio servers hand
//! out the owned session, HTTP servers go through their pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use anyhow::bail;
use mcp_types::CallToolResult;
use mcp_types::GetPromptResult;
use mcp_types::Implementation;
use mcp_types::Prompt;
use mcp_types::ReadResourceResult;
use mcp_types::Resource;
use mcp_types::Tool;
use serde::Serialize;
use tracing::info;
use tracing::warn;

use crate::client::McpClient;
use crate::health::HealthMonitor;
use crate::health::HealthRecord;
use crate::http::HttpEndpoint;
use crate::http::HttpTransport;
use crate::metadata::MetadataCache;
use crate::pool::ClientPool;
use crate::pool::PoolConfig;
use crate::pool::PoolStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Http,
}

/// How a server is reached. HTTP servers carry the endpoint the pool
/// factory uses to mint additional sessions.
pub enum ServerTransport {
    Stdio,
    Http {
        endpoint: HttpEndpoint,
        pool: PoolConfig,
    },
}

#[derive(Clone)]
struct ManagedServer {
    kind: TransportKind,
    client: Arc<McpClient>,
    pool: Option<Arc<ClientPool>>,
    endpoint: Option<HttpEndpoint>,
}

/// Read-only view of a managed server for the admin endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSnapshot {
    pub name: String,
    pub transport: TransportKind,
    pub initialized: bool,
    pub server_info: Option<Implementation>,
}

pub struct ServerManager {
    servers: Mutex<HashMap<String, ManagedServer>>,
    cache: MetadataCache,
    health: Arc<HealthMonitor>,
}

fn lock(servers: &Mutex<HashMap<String, ManagedServer>>) -> MutexGuard<'_, HashMap<String, ManagedServer>> {
    match servers.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn is_valid_server_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl ServerManager {
    pub fn new(
        metadata_ttl: Duration,
        health_interval: Duration,
        health_timeout: Duration,
    ) -> Arc<Self> {
        let health = Arc::new(HealthMonitor::new(health_interval, health_timeout));
        health.start();
        Arc::new(Self {
            servers: Mutex::new(HashMap::new()),
            cache: MetadataCache::new(metadata_ttl),
            health,
        })
    }

    /// Register a server under a unique name. The caller hands over an
    /// already-initialized session.
    pub fn add_server(
        &self,
        name: &str,
        client: McpClient,
        transport: ServerTransport,
    ) -> Result<()> {
        if !is_valid_server_name(name) {
            bail!("invalid server name '{name}': must match ^[a-zA-Z0-9_-]+$");
        }

        let client = Arc::new(client);
        let (kind, pool, endpoint) = match transport {
            ServerTransport::Stdio => (TransportKind::Stdio, None, None),
            ServerTransport::Http { endpoint, pool } => (
                TransportKind::Http,
                Some(Arc::new(ClientPool::new(name, pool))),
                Some(endpoint),
            ),
        };

        {
            let mut servers = lock(&self.servers);
            if servers.contains_key(name) {
                bail!("mcp server '{name}' already registered");
            }
            servers.insert(
                name.to_string(),
                ManagedServer {
                    kind,
                    client: client.clone(),
                    pool,
                    endpoint,
                },
            );
        }

        self.health.register(name, client);
        info!(server = %name, transport = ?kind, "mcp server added");
        Ok(())
    }

    pub async fn remove_server(&self, name: &str) -> Result<()> {
        let server = lock(&self.servers)
            .remove(name)
            .ok_or_else(|| anyhow!("unknown mcp server '{name}'"))?;

        self.health.unregister(name);
        if let Some(pool) = &server.pool {
            pool.close().await;
        }
        server.client.close().await;
        self.cache.invalidate_all(name);
        info!(server = %name, "mcp server removed");
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.servers).contains_key(name)
    }

    pub fn list_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.servers).keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn get_server(&self, name: &str) -> Option<ServerSnapshot> {
        let server = lock(&self.servers).get(name).cloned()?;
        Some(ServerSnapshot {
            name: name.to_string(),
            transport: server.kind,
            initialized: server.client.is_initialized().await,
            server_info: server.client.server_info().await,
        })
    }

    pub fn get_health(&self, name: &str) -> Option<HealthRecord> {
        self.health.get(name)
    }

    pub fn all_health(&self) -> HashMap<String, HealthRecord> {
        self.health.all()
    }

    /// Probe a server immediately, bypassing the monitor interval.
    pub async fn check_health(&self, name: &str) -> Option<HealthRecord> {
        self.health.check_now(name).await
    }

    pub fn pool_stats(&self, name: &str) -> Option<PoolStats> {
        lock(&self.servers)
            .get(name)
            .and_then(|server| server.pool.as_ref().map(|pool| pool.stats()))
    }

    /// Borrow a client for `name`. Stdio servers return the owned session;
    /// HTTP servers acquire from the pool, minting a fresh session when
    /// the pool has room.
    pub async fn get_client(&self, name: &str) -> Result<Arc<McpClient>> {
        let server = lock(&self.servers)
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("unknown mcp server '{name}'"))?;

        let Some(pool) = server.pool else {
            return Ok(server.client);
        };
        let endpoint = server
            .endpoint
            .ok_or_else(|| anyhow!("http server '{name}' has no endpoint"))?;

        let server_name = name.to_string();
        pool.acquire(move || {
            let endpoint = endpoint.clone();
            let server_name = server_name.clone();
            async move {
                let transport = HttpTransport::open(&endpoint)?;
                let client = McpClient::new(server_name, Arc::new(transport));
                client.initialize().await?;
                Ok(client)
            }
        })
        .await
        .with_context(|| format!("failed to acquire client for '{name}'"))
    }

    /// Return a borrowed client. Not releasing a stdio client does no
    /// harm; not releasing an HTTP client starves its pool. A client
    /// observed broken is dropped from the pool instead of returned.
    pub async fn release_client(&self, name: &str, client: &Arc<McpClient>) {
        let pool = lock(&self.servers)
            .get(name)
            .and_then(|server| server.pool.clone());
        if let Some(pool) = pool {
            if client.is_closed() {
                pool.remove(client).await;
            } else {
                pool.release(client);
            }
        }
    }

    /// Tool catalog for one server, served from the TTL cache when fresh.
    pub async fn server_tools(&self, name: &str) -> Result<Vec<Tool>> {
        if let Some(tools) = self.cache.get_tools(name) {
            return Ok(tools);
        }
        let server = lock(&self.servers)
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("unknown mcp server '{name}'"))?;
        let tools = server.client.refresh_tools().await?;
        self.cache.set_tools(name, tools.clone());
        Ok(tools)
    }

    pub async fn server_resources(&self, name: &str) -> Result<Vec<Resource>> {
        if let Some(resources) = self.cache.get_resources(name) {
            return Ok(resources);
        }
        let server = lock(&self.servers)
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("unknown mcp server '{name}'"))?;
        let resources = server.client.refresh_resources().await?;
        self.cache.set_resources(name, resources.clone());
        Ok(resources)
    }

    pub async fn server_prompts(&self, name: &str) -> Result<Vec<Prompt>> {
        if let Some(prompts) = self.cache.get_prompts(name) {
            return Ok(prompts);
        }
        let server = lock(&self.servers)
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("unknown mcp server '{name}'"))?;
        let prompts = server.client.refresh_prompts().await?;
        self.cache.set_prompts(name, prompts.clone());
        Ok(prompts)
    }

    /// Every server's tools, tagged with the server name. Servers that
    /// fail to list are skipped.
    pub async fn all_tools(&self) -> Vec<(String, Tool)> {
        let mut tagged = Vec::new();
        for name in self.list_servers() {
            match self.server_tools(&name).await {
                Ok(tools) => tagged.extend(tools.into_iter().map(|tool| (name.clone(), tool))),
                Err(e) => warn!(server = %name, "failed to list tools: {e:#}"),
            }
        }
        tagged
    }

    /// Invoke a tool on a server, borrowing and returning a client around
    /// the call.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<CallToolResult> {
        let client = self.get_client(server).await?;
        let result = client.call_tool(tool, arguments, timeout).await;
        self.release_client(server, &client).await;
        result.with_context(|| format!("tool call failed for '{server}/{tool}'"))
    }

    pub async fn read_resource(
        &self,
        server: &str,
        uri: &str,
        timeout: Option<Duration>,
    ) -> Result<ReadResourceResult> {
        let client = self.get_client(server).await?;
        let result = client.read_resource(uri, timeout).await;
        self.release_client(server, &client).await;
        result.with_context(|| format!("resource read failed for '{server}/{uri}'"))
    }

    pub async fn get_prompt(
        &self,
        server: &str,
        prompt: &str,
        arguments: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<GetPromptResult> {
        let client = self.get_client(server).await?;
        let result = client.get_prompt(prompt, arguments, timeout).await;
        self.release_client(server, &client).await;
        result.with_context(|| format!("prompt get failed for '{server}/{prompt}'"))
    }

    /// Re-run discovery on the owned session and refresh the cache.
    pub async fn refresh_server(&self, name: &str) -> Result<()> {
        let server = lock(&self.servers)
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("unknown mcp server '{name}'"))?;

        self.cache.invalidate_all(name);
        server.client.discover().await;
        self.cache.set_tools(name, server.client.tools().await);
        self.cache.set_resources(name, server.client.resources().await);
        self.cache.set_prompts(name, server.client.prompts().await);
        Ok(())
    }

    /// Stop the health monitor and cache sweeper, close every pool and
    /// client, and clear the server map.
    pub async fn close(&self) {
        self.health.stop();
        self.cache.close();

        let servers: Vec<(String, ManagedServer)> = lock(&self.servers).drain().collect();
        for (name, server) in servers {
            if let Some(pool) = &server.pool {
                pool.close().await;
            }
            server.client.close().await;
            info!(server = %name, "mcp server closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::initialized_client;
    use pretty_assertions::assert_eq;

    fn manager() -> Arc<ServerManager> {
        ServerManager::new(
            Duration::from_secs(60),
            Duration::from_secs(60),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn duplicate_registration_fails() {
        let manager = manager();
        manager
            .add_server("srv", initialized_client("srv").await, ServerTransport::Stdio)
            .expect("first add");
        let err = manager
            .add_server("srv", initialized_client("srv").await, ServerTransport::Stdio)
            .expect_err("duplicate must fail");
        assert!(err.to_string().contains("already registered"));
    }

    #[tokio::test]
    async fn invalid_names_are_rejected() {
        let manager = manager();
        for name in ["", "bad name", "slash/y"] {
            assert!(
                manager
                    .add_server(name, initialized_client("x").await, ServerTransport::Stdio)
                    .is_err(),
                "{name:?} must be rejected"
            );
        }
    }

    #[tokio::test]
    async fn stdio_get_client_returns_owned_session() {
        let manager = manager();
        manager
            .add_server("srv", initialized_client("srv").await, ServerTransport::Stdio)
            .expect("add");
        let first = manager.get_client("srv").await.expect("get");
        let second = manager.get_client("srv").await.expect("get");
        assert!(Arc::ptr_eq(&first, &second));
        manager.release_client("srv", &first).await;
    }

    #[tokio::test]
    async fn unknown_server_is_an_error() {
        let manager = manager();
        let err = manager.get_client("ghost").await.expect_err("unknown");
        assert!(err.to_string().contains("unknown mcp server"));
        assert!(manager.get_server("ghost").await.is_none());
    }

    #[tokio::test]
    async fn remove_clears_health_and_closes_client() {
        let manager = manager();
        manager
            .add_server("srv", initialized_client("srv").await, ServerTransport::Stdio)
            .expect("add");
        let client = manager.get_client("srv").await.expect("get");

        manager.remove_server("srv").await.expect("remove");
        assert!(client.is_closed());
        assert!(manager.get_health("srv").is_none());
        assert!(!manager.contains("srv"));
    }

    #[tokio::test]
    async fn list_servers_is_sorted() {
        let manager = manager();
        for name in ["zeta", "alpha", "mid"] {
            manager
                .add_server(name, initialized_client(name).await, ServerTransport::Stdio)
                .expect("add");
        }
        assert_eq!(
            manager.list_servers(),
            vec!["alpha".to_string(), "mid".to_string(), "zeta".to_string()]
        );
    }

    #[tokio::test]
    async fn pool_stats_only_for_http_servers() {
        let manager = manager();
        manager
            .add_server("srv", initialized_client("srv").await, ServerTransport::Stdio)
            .expect("add");
        assert!(manager.pool_stats("srv").is_none());
    }

    #[tokio::test]
    async fn call_tool_round_trips_through_owned_client() {
        let manager = manager();
        manager
            .add_server("srv", initialized_client("srv").await, ServerTransport::Stdio)
            .expect("add");
        let result = manager
            .call_tool("srv", "echo", None, None)
            .await
            .expect("call");
        assert!(result.content.is_empty());
    }

    #[tokio::test]
    async fn close_cascades_to_clients() {
        let manager = manager();
        manager
            .add_server("srv", initialized_client("srv").await, ServerTransport::Stdio)
            .expect("add");
        let client = manager.get_client("srv").await.expect("get");
        manager.close().await;
        assert!(client.is_closed());
        assert!(manager.list_servers().is_empty());
    }
}
