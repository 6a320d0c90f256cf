use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// Failure modes a transport can surface to the session layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("http failure: {0}")]
    Http(String),

    #[error("unexpected status {0}")]
    HttpStatus(u16),

    #[error("server returned JSON-RPC error: code = {code}, message = {message}")]
    Rpc { code: i64, message: String },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("failed to encode message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A JSON-RPC request/response channel to a single MCP server.
///
/// Implementations are safe for concurrent use; each in-flight request is
/// correlated to its response by id. `close` is idempotent and releases any
/// pending waiters with [`TransportError::Closed`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a request and await the `result` payload of its response.
    ///
    /// A JSON-RPC error envelope surfaces as [`TransportError::Rpc`]. When
    /// `timeout` elapses before a response arrives, the waiter is
    /// deregistered and a late response for that id is dropped.
    async fn send(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, TransportError>;

    /// Fire a notification. No response is expected.
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError>;

    /// Shut the transport down, releasing OS handles and pending waiters.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}
