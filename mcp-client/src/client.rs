//! Stateful MCP session over a transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use mcp_types::CallToolRequest;
use mcp_types::CallToolRequestParams;
use mcp_types::CallToolResult;
use mcp_types::ClientCapabilities;
use mcp_types::GetPromptRequest;
use mcp_types::GetPromptRequestParams;
use mcp_types::GetPromptResult;
use mcp_types::Implementation;
use mcp_types::InitializeRequest;
use mcp_types::InitializeRequestParams;
use mcp_types::InitializedNotification;
use mcp_types::ListPromptsRequest;
use mcp_types::ListResourcesRequest;
use mcp_types::ListToolsRequest;
use mcp_types::MCP_SCHEMA_VERSION;
use mcp_types::ModelContextProtocolNotification;
use mcp_types::ModelContextProtocolRequest;
use mcp_types::Prompt;
use mcp_types::ReadResourceRequest;
use mcp_types::ReadResourceRequestParams;
use mcp_types::ReadResourceResult;
use mcp_types::Resource;
use mcp_types::ServerCapabilities;
use mcp_types::Tool;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::transport::Transport;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
struct SessionState {
    initialized: bool,
    server_info: Option<Implementation>,
    capabilities: Option<ServerCapabilities>,
    tools: HashMap<String, Tool>,
    resources: HashMap<String, Resource>,
    prompts: HashMap<String, Prompt>,
}

/// A session with one MCP server. Catalog reads take a read lock;
/// refreshes replace a catalog atomically under the write lock. All
/// request methods other than [`initialize`](Self::initialize) fail until
/// the handshake has completed.
pub struct McpClient {
    server_name: String,
    transport: Arc<dyn Transport>,
    state: RwLock<SessionState>,
    request_timeout: Duration,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("server_name", &self.server_name)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl McpClient {
    pub fn new(server_name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            server_name: server_name.into(),
            transport,
            state: RwLock::new(SessionState::default()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.read().await.initialized
    }

    pub async fn server_info(&self) -> Option<Implementation> {
        self.state.read().await.server_info.clone()
    }

    pub async fn capabilities(&self) -> Option<ServerCapabilities> {
        self.state.read().await.capabilities.clone()
    }

    /// Typed request dispatch. `Params` serializing to null is encoded as
    /// an absent `params` field.
    async fn send_request<R>(&self, params: R::Params, timeout: Option<Duration>) -> Result<R::Result>
    where
        R: ModelContextProtocolRequest,
        R::Params: Serialize,
        R::Result: DeserializeOwned,
    {
        let params_json = serde_json::to_value(&params)?;
        let params_field = if params_json.is_null() {
            None
        } else {
            Some(params_json)
        };
        let timeout = timeout.or(Some(self.request_timeout));
        let result = self
            .transport
            .send(R::METHOD, params_field, timeout)
            .await
            .with_context(|| format!("{} request to '{}' failed", R::METHOD, self.server_name))?;
        serde_json::from_value(result)
            .with_context(|| format!("undecodable {} result from '{}'", R::METHOD, self.server_name))
    }

    async fn ensure_initialized(&self) -> Result<()> {
        if self.state.read().await.initialized {
            Ok(())
        } else {
            Err(anyhow!("mcp server '{}' not initialized", self.server_name))
        }
    }

    /// Negotiate the session: `initialize`, then
    /// `notifications/initialized`. A failed notification is logged but
    /// does not fail the handshake.
    pub async fn initialize(&self) -> Result<()> {
        let params = InitializeRequestParams {
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "llamagate".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            protocol_version: MCP_SCHEMA_VERSION.to_string(),
        };
        let result = self.send_request::<InitializeRequest>(params, None).await?;

        if let Err(e) = self
            .transport
            .notify(InitializedNotification::METHOD, None)
            .await
        {
            warn!(
                server = %self.server_name,
                "failed to send initialized notification: {e}"
            );
        }

        let mut state = self.state.write().await;
        info!(
            server = %self.server_name,
            remote = %result.server_info.name,
            version = %result.server_info.version,
            "mcp session initialized"
        );
        state.server_info = Some(result.server_info);
        state.capabilities = Some(result.capabilities);
        state.initialized = true;
        Ok(())
    }

    /// Run all three discovery calls. Each failure is logged and leaves
    /// that catalog empty; the session stays usable for the others.
    pub async fn discover(&self) {
        if let Err(e) = self.refresh_tools().await {
            warn!(server = %self.server_name, "tool discovery failed: {e:#}");
        }
        if let Err(e) = self.refresh_resources().await {
            warn!(server = %self.server_name, "resource discovery failed: {e:#}");
        }
        if let Err(e) = self.refresh_prompts().await {
            warn!(server = %self.server_name, "prompt discovery failed: {e:#}");
        }
    }

    pub async fn refresh_tools(&self) -> Result<Vec<Tool>> {
        self.ensure_initialized().await?;
        let result = self.send_request::<ListToolsRequest>(None, None).await?;
        let mut state = self.state.write().await;
        state.tools = result
            .tools
            .iter()
            .map(|tool| (tool.name.clone(), tool.clone()))
            .collect();
        debug!(server = %self.server_name, count = result.tools.len(), "tools refreshed");
        Ok(result.tools)
    }

    pub async fn refresh_resources(&self) -> Result<Vec<Resource>> {
        self.ensure_initialized().await?;
        let result = self.send_request::<ListResourcesRequest>(None, None).await?;
        let mut state = self.state.write().await;
        state.resources = result
            .resources
            .iter()
            .map(|resource| (resource.uri.clone(), resource.clone()))
            .collect();
        Ok(result.resources)
    }

    pub async fn refresh_prompts(&self) -> Result<Vec<Prompt>> {
        self.ensure_initialized().await?;
        let result = self.send_request::<ListPromptsRequest>(None, None).await?;
        let mut state = self.state.write().await;
        state.prompts = result
            .prompts
            .iter()
            .map(|prompt| (prompt.name.clone(), prompt.clone()))
            .collect();
        Ok(result.prompts)
    }

    /// Current tool catalog, sorted by name.
    pub async fn tools(&self) -> Vec<Tool> {
        let state = self.state.read().await;
        let mut tools: Vec<Tool> = state.tools.values().cloned().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub async fn resources(&self) -> Vec<Resource> {
        let state = self.state.read().await;
        let mut resources: Vec<Resource> = state.resources.values().cloned().collect();
        resources.sort_by(|a, b| a.uri.cmp(&b.uri));
        resources
    }

    pub async fn prompts(&self) -> Vec<Prompt> {
        let state = self.state.read().await;
        let mut prompts: Vec<Prompt> = state.prompts.values().cloned().collect();
        prompts.sort_by(|a, b| a.name.cmp(&b.name));
        prompts
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<CallToolResult> {
        self.ensure_initialized().await?;
        let params = CallToolRequestParams {
            name: name.to_string(),
            arguments,
        };
        self.send_request::<CallToolRequest>(params, timeout).await
    }

    pub async fn read_resource(
        &self,
        uri: &str,
        timeout: Option<Duration>,
    ) -> Result<ReadResourceResult> {
        self.ensure_initialized().await?;
        let params = ReadResourceRequestParams {
            uri: uri.to_string(),
        };
        self.send_request::<ReadResourceRequest>(params, timeout)
            .await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<GetPromptResult> {
        self.ensure_initialized().await?;
        let params = GetPromptRequestParams {
            name: name.to_string(),
            arguments,
        };
        self.send_request::<GetPromptRequest>(params, timeout).await
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }
}
