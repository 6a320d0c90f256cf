//! Gateway configuration: a TOML file with serde defaults, overridable by
//! environment variables and CLI flags.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;

use crate::tool_loop::ToolLoopConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub ollama_host: String,
    /// Shared secret. When unset, authentication is disabled.
    pub api_key: Option<String>,
    /// Global requests per second. When unset, rate limiting is disabled.
    pub rate_limit: Option<f64>,
    pub cache: CacheConfig,
    pub tools: ToolsConfig,
    pub mcp: McpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 11435,
            ollama_host: "http://localhost:11434".to_string(),
            api_key: None,
            rate_limit: None,
            cache: CacheConfig::default(),
            tools: ToolsConfig::default(),
            mcp: McpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: crate::cache::DEFAULT_MAX_ENTRIES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub max_rounds: usize,
    pub max_calls_per_round: usize,
    pub max_total_calls: usize,
    pub max_result_bytes: usize,
    pub call_timeout_secs: u64,
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        let defaults = ToolLoopConfig::default();
        Self {
            max_rounds: defaults.max_rounds,
            max_calls_per_round: defaults.max_calls_per_round,
            max_total_calls: defaults.max_total_calls,
            max_result_bytes: defaults.max_result_bytes,
            call_timeout_secs: defaults.call_timeout.as_secs(),
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }
}

impl ToolsConfig {
    pub fn to_loop_config(&self) -> ToolLoopConfig {
        ToolLoopConfig {
            max_rounds: self.max_rounds,
            max_calls_per_round: self.max_calls_per_round,
            max_total_calls: self.max_total_calls,
            max_result_bytes: self.max_result_bytes,
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            allow: self.allow.clone(),
            deny: self.deny.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    pub enabled: bool,
    pub metadata_ttl_secs: u64,
    pub health_interval_secs: u64,
    pub health_timeout_secs: u64,
    pub resource_fetch_timeout_secs: u64,
    pub servers: Vec<McpServerConfig>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            metadata_ttl_secs: 300,
            health_interval_secs: 60,
            health_timeout_secs: 5,
            resource_fetch_timeout_secs: 30,
            servers: Vec::new(),
        }
    }
}

/// One configured MCP server: a `command` to spawn over stdio, or a `url`
/// to POST to. Exactly one of the two must be set.
#[derive(Debug, Clone, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: usize,
    #[serde(default = "default_pool_max_idle_secs")]
    pub pool_max_idle_secs: u64,
    #[serde(default = "default_pool_acquire_timeout_secs")]
    pub pool_acquire_timeout_secs: u64,
}

fn default_pool_max_size() -> usize {
    5
}

fn default_pool_max_idle_secs() -> u64 {
    300
}

fn default_pool_acquire_timeout_secs() -> u64 {
    30
}

impl McpServerConfig {
    pub fn validate(&self) -> Result<()> {
        match (&self.command, &self.url) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            (Some(_), Some(_)) => anyhow::bail!(
                "mcp server '{}' sets both command and url; pick one",
                self.name
            ),
            (None, None) => anyhow::bail!(
                "mcp server '{}' needs either a command or a url",
                self.name
            ),
        }
    }
}

impl Config {
    /// Read `path` (or defaults when absent), then apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env();
        for server in &config.mcp.servers {
            server.validate()?;
        }
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("OLLAMA_HOST") {
            self.ollama_host = host;
        }
        if let Ok(key) = std::env::var("LLAMAGATE_API_KEY") {
            self.api_key = Some(key);
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }
    }
}
