//! Shared fixtures: a scripted JSON-RPC MCP mock, router construction,
//! and a oneshot request helper.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::HeaderMap;
use axum::http::Request;
use axum::http::StatusCode;
use bytes::Bytes;
use llamagate_core::AppState;
use llamagate_core::ProxyEngine;
use llamagate_core::configure_app;
use llamagate_core::ollama::OllamaClient;
use llamagate_core::tool_loop::ToolLoopConfig;
use llamagate_mcp_client::HttpEndpoint;
use llamagate_mcp_client::HttpTransport;
use llamagate_mcp_client::McpClient;
use llamagate_mcp_client::PoolConfig;
use llamagate_mcp_client::ServerManager;
use llamagate_mcp_client::ServerTransport;
use serde_json::Value;
use serde_json::json;
use tower::ServiceExt;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;

/// A wiremock server speaking JSON-RPC: `initialize` is answered
/// implicitly, `notifications/initialized` gets a 202, every other method
/// is looked up in `results` (unknown methods produce a -32601 error).
pub async fn start_mcp_mock(results: HashMap<&'static str, Value>) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(move |request: &wiremock::Request| {
            let body: Value = serde_json::from_slice(&request.body).expect("json-rpc body");
            let rpc_method = body["method"].as_str().unwrap_or_default().to_string();
            if rpc_method == "notifications/initialized" {
                return ResponseTemplate::new(202);
            }
            let result = if rpc_method == "initialize" {
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": { "tools": {}, "resources": {}, "prompts": {} },
                    "serverInfo": { "name": "mock-mcp", "version": "0.1" }
                })
            } else if let Some(result) = results.get(rpc_method.as_str()) {
                result.clone()
            } else {
                return ResponseTemplate::new(200).set_body_json(json!({
                    "jsonrpc": "2.0",
                    "id": body["id"],
                    "error": { "code": -32601, "message": format!("no such method {rpc_method}") }
                }));
            };
            ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": body["id"],
                "result": result
            }))
        })
        .mount(&server)
        .await;
    server
}

/// A manager with a single HTTP-backed server pointed at `url`.
pub async fn manager_with_http_server(name: &str, url: String) -> Arc<ServerManager> {
    let manager = ServerManager::new(
        Duration::from_secs(300),
        // Long interval: tests drive probes explicitly.
        Duration::from_secs(600),
        Duration::from_secs(5),
    );
    let endpoint = HttpEndpoint::new(url);
    let transport = HttpTransport::open(&endpoint).expect("open http transport");
    let client = McpClient::new(name, Arc::new(transport));
    client.initialize().await.expect("initialize mcp client");
    manager
        .add_server(
            name,
            client,
            ServerTransport::Http {
                endpoint,
                pool: PoolConfig::default(),
            },
        )
        .expect("add server");
    manager
}

pub struct AppBuilder {
    ollama_uri: String,
    manager: Option<Arc<ServerManager>>,
    api_key: Option<String>,
    rate_limit: Option<f64>,
    tool_config: Option<ToolLoopConfig>,
    cache_enabled: bool,
}

impl AppBuilder {
    pub fn new(ollama_uri: &str) -> Self {
        Self {
            ollama_uri: ollama_uri.to_string(),
            manager: None,
            api_key: None,
            rate_limit: None,
            tool_config: None,
            cache_enabled: true,
        }
    }

    pub fn manager(mut self, manager: Arc<ServerManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    pub fn api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }

    pub fn rate_limit(mut self, rate: f64) -> Self {
        self.rate_limit = Some(rate);
        self
    }

    pub fn tool_config(mut self, config: ToolLoopConfig) -> Self {
        self.tool_config = Some(config);
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn build(self) -> Router {
        let mut proxy =
            ProxyEngine::new(OllamaClient::new(self.ollama_uri)).with_cache(self.cache_enabled, 64);
        if let Some(manager) = self.manager {
            proxy = proxy.with_mcp(manager);
        }
        if let Some(config) = self.tool_config {
            proxy = proxy.with_tool_config(config);
        }
        let state = AppState::new(Arc::new(proxy))
            .with_api_key(self.api_key)
            .with_rate_limit(self.rate_limit);
        configure_app(state)
    }
}

/// Fire one request at the router and collect status, headers, and body.
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, HeaderMap, Bytes) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };

    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, headers, body)
}

pub fn parse_json(body: &Bytes) -> Value {
    serde_json::from_slice(body).expect("json body")
}
