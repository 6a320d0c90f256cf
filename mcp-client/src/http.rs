//! HTTP transport: one JSON-RPC envelope per POST, correlated
//! synchronously.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use mcp_types::JSONRPC_VERSION;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCNotification;
use mcp_types::JSONRPCRequest;
use mcp_types::RequestId;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use serde_json::Value;
use tokio::time;
use tracing::debug;

use crate::request_context;
use crate::transport::Transport;
use crate::transport::TransportError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection details for an HTTP-backed MCP server.
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

impl HttpEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            timeout: None,
        }
    }
}

pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    closed: AtomicBool,
}

impl HttpTransport {
    /// Build a transport for `endpoint`. Caller headers are merged over a
    /// default `Content-Type: application/json`.
    pub fn open(endpoint: &HttpEndpoint) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &endpoint.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Http(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Http(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(endpoint.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;

        Ok(Self {
            client,
            url: endpoint.url.clone(),
            closed: AtomicBool::new(false),
        })
    }

    /// Per-call ids are unix-epoch nanoseconds: unique within a process by
    /// clock monotonicity, and each POST is correlated synchronously
    /// anyway.
    fn next_id() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or_default()
    }

    async fn post(&self, body: &impl serde::Serialize) -> Result<reqwest::Response, TransportError> {
        let mut request = self.client.post(self.url.as_str()).json(body);
        if let Some(request_id) = request_context::current_request_id() {
            request = request.header("X-Request-ID", request_id);
        }
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus(status.as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let id = Self::next_id();
        let request = JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Integer(id),
            method: method.to_string(),
            params,
        };
        debug!(url = %self.url, method, "mcp http request");

        let exchange = async {
            let response = self.post(&request).await?;
            let body = response
                .bytes()
                .await
                .map_err(|e| TransportError::Http(e.to_string()))?;
            let message: JSONRPCMessage = serde_json::from_slice(&body).map_err(|e| {
                TransportError::Protocol(format!("undecodable JSON-RPC response: {e}"))
            })?;
            match message {
                JSONRPCMessage::Response(resp) => {
                    if resp.id != RequestId::Integer(id) {
                        return Err(TransportError::Protocol(format!(
                            "response id {} does not match request id {id}",
                            resp.id
                        )));
                    }
                    Ok(resp.result)
                }
                JSONRPCMessage::Error(err) => Err(TransportError::Rpc {
                    code: err.error.code,
                    message: err.error.message,
                }),
                other => Err(TransportError::Protocol(format!(
                    "unexpected message in reply: {other:?}"
                ))),
            }
        };

        match timeout {
            Some(duration) => time::timeout(duration, exchange)
                .await
                .map_err(|_| TransportError::Timeout(duration))?,
            None => exchange.await,
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let notification = JSONRPCNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        };
        // Some servers answer notifications with 202 and an empty body;
        // only the status matters.
        self.post(&notification).await.map(|_| ())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
