//! Client fabric for the Model Context Protocol (MCP).
//!
//! The crate provides everything the gateway needs to talk to remote MCP
//! servers:
//!
//!   * two transports — a subprocess speaking newline-delimited JSON-RPC
//!     over its stdio ([`StdioTransport`]) and a plain HTTP POST
//!     request/response transport ([`HttpTransport`]);
//!   * a per-server session ([`McpClient`]) handling the initialize
//!     handshake and tool/resource/prompt discovery;
//!   * a bounded connection pool for HTTP-backed servers ([`ClientPool`]);
//!   * a periodic health monitor ([`HealthMonitor`]);
//!   * a TTL cache for discovered metadata ([`MetadataCache`]);
//!   * a [`ServerManager`] composing all of the above with per-server
//!     lifecycles.

mod client;
mod health;
mod http;
mod manager;
mod metadata;
mod pool;
pub mod request_context;
mod stdio;
#[cfg(test)]
mod test_support;
mod transport;
mod uri;

pub use client::McpClient;
pub use health::HealthMonitor;
pub use health::HealthRecord;
pub use health::HealthStatus;
pub use http::HttpEndpoint;
pub use http::HttpTransport;
pub use manager::ServerManager;
pub use manager::ServerSnapshot;
pub use manager::ServerTransport;
pub use manager::TransportKind;
pub use metadata::MetadataCache;
pub use pool::ClientPool;
pub use pool::PoolConfig;
pub use pool::PoolError;
pub use pool::PoolStats;
pub use stdio::StdioTransport;
pub use transport::Transport;
pub use transport::TransportError;
pub use uri::McpUri;
pub use uri::extract_uris;
