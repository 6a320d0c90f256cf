//! Shared fixtures for in-crate tests.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;

use crate::client::McpClient;
use crate::transport::Transport;
use crate::transport::TransportError;

/// Answers every request with a result that satisfies the initialize and
/// list deserializers at once. Optionally fails every send instead.
pub(crate) struct UniversalTransport {
    fail: bool,
    closed: AtomicBool,
}

impl UniversalTransport {
    pub(crate) fn answering() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Transport for UniversalTransport {
    async fn send(
        &self,
        _method: &str,
        _params: Option<Value>,
        _timeout: Option<Duration>,
    ) -> Result<Value, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.fail {
            return Err(TransportError::Http("synthetic failure".to_string()));
        }
        Ok(json!({
            "protocolVersion": mcp_types::MCP_SCHEMA_VERSION,
            "capabilities": {},
            "serverInfo": { "name": "null", "version": "0" },
            "tools": [],
            "resources": [],
            "prompts": [],
            "content": [],
            "contents": [],
            "messages": []
        }))
    }

    async fn notify(&self, _method: &str, _params: Option<Value>) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A client over a transport that answers everything.
pub(crate) fn null_client(name: &str) -> McpClient {
    McpClient::new(name, UniversalTransport::answering())
}

/// A client whose transport has already completed the handshake.
pub(crate) async fn initialized_client(name: &str) -> McpClient {
    let client = null_client(name);
    client.initialize().await.expect("initialize null client");
    client
}

/// A client whose every request fails.
pub(crate) fn failing_client(name: &str) -> McpClient {
    McpClient::new(name, UniversalTransport::failing())
}
