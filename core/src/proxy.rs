//! The proxy request engine: validation, cache, resource expansion, tool
//! dispatch, and OpenAI↔Ollama translation.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use llamagate_mcp_client::ServerManager;
use tracing::debug;
use tracing::warn;

use crate::cache::DEFAULT_MAX_ENTRIES;
use crate::cache::ResponseCache;
use crate::cache::fingerprint;
use crate::context::DEFAULT_FETCH_TIMEOUT;
use crate::context::expand_resources;
use crate::error::GatewayError;
use crate::ollama::OllamaChatRequest;
use crate::ollama::OllamaClient;
use crate::ollama::OllamaOptions;
use crate::ollama::TagsOutcome;
use crate::ollama::to_ollama_messages;
use crate::openai::ChatCompletionRequest;
use crate::openai::ModelList;
use crate::tool_loop::ToolLoopConfig;
use crate::tool_loop::run_tool_loop;
use crate::tool_loop::tool_listing_message;

/// What a chat request resolves to: a buffered JSON response (forwarded or
/// assembled) or an upstream response whose body is streamed through
/// verbatim.
pub enum ChatOutcome {
    Json {
        status: u16,
        content_type: String,
        body: Bytes,
    },
    Stream(reqwest::Response),
}

pub struct ProxyEngine {
    ollama: OllamaClient,
    cache: ResponseCache,
    cache_enabled: bool,
    mcp: Option<Arc<ServerManager>>,
    tool_config: ToolLoopConfig,
    resource_fetch_timeout: Duration,
}

impl ProxyEngine {
    pub fn new(ollama: OllamaClient) -> Self {
        Self {
            ollama,
            cache: ResponseCache::new(DEFAULT_MAX_ENTRIES),
            cache_enabled: true,
            mcp: None,
            tool_config: ToolLoopConfig::default(),
            resource_fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_cache(mut self, enabled: bool, max_entries: usize) -> Self {
        self.cache = ResponseCache::new(max_entries);
        self.cache_enabled = enabled;
        self
    }

    pub fn with_mcp(mut self, manager: Arc<ServerManager>) -> Self {
        self.mcp = Some(manager);
        self
    }

    pub fn with_tool_config(mut self, config: ToolLoopConfig) -> Self {
        self.tool_config = config;
        self
    }

    pub fn with_resource_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.resource_fetch_timeout = timeout;
        self
    }

    pub fn mcp(&self) -> Option<&Arc<ServerManager>> {
        self.mcp.as_ref()
    }

    pub fn ollama_host(&self) -> &str {
        self.ollama.base_url()
    }

    pub async fn upstream_health(&self, timeout: Duration) -> Result<(), String> {
        self.ollama.probe(timeout).await
    }

    /// `POST /v1/chat/completions`.
    pub async fn handle_chat(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatOutcome, GatewayError> {
        if request.model.trim().is_empty() {
            return Err(GatewayError::Validation("model is required".to_string()));
        }
        if request.messages.is_empty() {
            return Err(GatewayError::Validation(
                "messages must not be empty".to_string(),
            ));
        }

        let catalog = match &self.mcp {
            Some(manager) => manager.all_tools().await,
            None => Vec::new(),
        };

        // Non-streaming requests with MCP tools in play take the tool
        // loop; its result is already an OpenAI-shaped completion.
        if let Some(manager) = &self.mcp {
            if !request.is_streaming() && !catalog.is_empty() {
                let response =
                    run_tool_loop(&self.ollama, manager, &self.tool_config, &request, &catalog)
                        .await?;
                let body = serde_json::to_vec(&response)
                    .map_err(|e| GatewayError::Internal(e.into()))?;
                return Ok(ChatOutcome::Json {
                    status: 200,
                    content_type: "application/json".to_string(),
                    body: body.into(),
                });
            }
        }

        let mut request = request;
        if let Some(manager) = &self.mcp {
            request.messages =
                expand_resources(manager, request.messages, self.resource_fetch_timeout).await;
        }

        // The listing message is part of what Ollama sees, so it must be
        // part of the fingerprint too.
        if !catalog.is_empty() {
            let mut messages = Vec::with_capacity(request.messages.len() + 1);
            messages.push(tool_listing_message(&catalog));
            messages.extend(request.messages);
            request.messages = messages;
        }

        let streaming = request.is_streaming();
        let cache_key = if !streaming && self.cache_enabled {
            let key = fingerprint(&request);
            if let Some(body) = self.cache.get(&key) {
                debug!(key = %key, "response cache hit");
                return Ok(ChatOutcome::Json {
                    status: 200,
                    content_type: "application/json".to_string(),
                    body,
                });
            }
            Some(key)
        } else {
            None
        };

        let upstream = OllamaChatRequest {
            model: request.model.clone(),
            messages: to_ollama_messages(&request.messages),
            stream: streaming,
            options: OllamaOptions::from_request(request.temperature, request.max_tokens),
            tools: None,
        };

        if streaming {
            let response = self
                .ollama
                .chat_stream(&upstream)
                .await
                .map_err(|e| GatewayError::Upstream(format!("{e:#}")))?;
            return Ok(ChatOutcome::Stream(response));
        }

        let (status, content_type, body) = self
            .ollama
            .chat_raw(&upstream)
            .await
            .map_err(|e| GatewayError::Upstream(format!("{e:#}")))?;

        if status == 200 {
            if let Some(key) = cache_key {
                self.cache.set(key, body.clone());
            }
        }

        Ok(ChatOutcome::Json {
            status,
            content_type,
            body,
        })
    }

    /// `GET /v1/models`: reshape `/api/tags`. A reachable upstream that
    /// answers with an HTTP error yields an empty list (documented
    /// policy); unreachable or undecodable upstreams are a 502.
    pub async fn models(&self) -> Result<ModelList, GatewayError> {
        match self.ollama.fetch_models().await {
            Ok(TagsOutcome::Models(names)) => Ok(ModelList::from_names(names)),
            Ok(TagsOutcome::UpstreamError(status)) => {
                warn!(status, "ollama tags endpoint errored; returning empty model list");
                Ok(ModelList::from_names(Vec::new()))
            }
            Err(e) => Err(GatewayError::Upstream(format!("{e:#}"))),
        }
    }
}
