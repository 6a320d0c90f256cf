//! Gateway core: an OpenAI-style Chat Completions facade over a local
//! Ollama instance, with MCP tools, resources, and prompts federated in.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod ollama;
pub mod openai;
pub mod proxy;
pub mod rate_limit;
pub mod server;
pub mod tool_loop;

pub use config::Config;
pub use error::GatewayError;
pub use proxy::ProxyEngine;
pub use server::AppState;
pub use server::configure_app;
