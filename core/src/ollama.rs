//! Client for the native Ollama HTTP API (`/api/chat`, `/api/tags`).

use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use bytes::Bytes;
use llamagate_mcp_client::request_context;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::openai::ChatMessage;
use crate::openai::ToolCall;
use crate::openai::ToolDef;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OllamaChatRequest {
    pub model: String,
    pub messages: Vec<OllamaMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<OllamaOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

impl OllamaOptions {
    pub fn from_request(temperature: Option<f32>, max_tokens: Option<u32>) -> Option<Self> {
        if temperature.is_none() && max_tokens.is_none() {
            return None;
        }
        Some(Self {
            temperature,
            num_predict: max_tokens,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaChatResponse {
    #[serde(default)]
    pub model: Option<String>,
    pub message: OllamaMessage,
    #[serde(default)]
    pub done: bool,
}

/// Outcome of a `/api/tags` call that reached the server.
pub enum TagsOutcome {
    Models(Vec<String>),
    UpstreamError(u16),
}

/// Flatten OpenAI messages into Ollama's string-content shape. Structured
/// part lists collapse to their concatenated text.
pub fn to_ollama_messages(messages: &[ChatMessage]) -> Vec<OllamaMessage> {
    messages
        .iter()
        .map(|message| OllamaMessage {
            role: message.role.clone(),
            content: message.text().unwrap_or_default(),
            tool_calls: message.tool_calls.clone(),
            tool_call_id: message.tool_call_id.clone(),
        })
        .collect()
}

pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    fn post_chat(&self, request: &OllamaChatRequest) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(self.chat_url()).json(request);
        if let Some(request_id) = request_context::current_request_id() {
            builder = builder.header("X-Request-ID", request_id);
        }
        builder
    }

    /// Non-streaming chat, parsed. Used by the tool loop, which always
    /// forces `stream: false`.
    pub async fn chat(&self, request: &OllamaChatRequest) -> Result<OllamaChatResponse> {
        let response = self
            .post_chat(request)
            .send()
            .await
            .context("failed to reach ollama")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("ollama returned {status}: {body}");
        }
        response
            .json::<OllamaChatResponse>()
            .await
            .context("undecodable ollama chat response")
    }

    /// Non-streaming chat, raw. The proxy forwards status, content type,
    /// and body verbatim (and caches 200s).
    pub async fn chat_raw(&self, request: &OllamaChatRequest) -> Result<(u16, String, Bytes)> {
        let response = self
            .post_chat(request)
            .send()
            .await
            .context("failed to reach ollama")?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/json")
            .to_string();
        let body = response
            .bytes()
            .await
            .context("failed to read ollama response body")?;
        Ok((status, content_type, body))
    }

    /// Streaming chat: hands back the upstream response so its body can be
    /// piped to the client untouched.
    pub async fn chat_stream(&self, request: &OllamaChatRequest) -> Result<reqwest::Response> {
        debug!(model = %request.model, "starting ollama chat stream");
        self.post_chat(request)
            .send()
            .await
            .context("failed to reach ollama")
    }

    /// Model names from `/api/tags`. A reachable server with a non-2xx
    /// status is reported as [`TagsOutcome::UpstreamError`]; connection
    /// and decode failures are errors.
    pub async fn fetch_models(&self) -> Result<TagsOutcome> {
        let url = format!("{}/api/tags", self.base_url.trim_end_matches('/'));
        let mut builder = self.client.get(url);
        if let Some(request_id) = request_context::current_request_id() {
            builder = builder.header("X-Request-ID", request_id);
        }
        let response = builder.send().await.context("failed to reach ollama")?;
        let status = response.status();
        if !status.is_success() {
            return Ok(TagsOutcome::UpstreamError(status.as_u16()));
        }
        let value = response
            .json::<Value>()
            .await
            .context("undecodable /api/tags response")?;
        let names = value
            .get("models")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|model| model.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(TagsOutcome::Models(names))
    }

    /// Liveness probe for `/health`.
    pub async fn probe(&self, timeout: Duration) -> Result<(), String> {
        let url = format!("{}/api/tags", self.base_url.trim_end_matches('/'));
        let send = self.client.get(url).timeout(timeout).send();
        match send.await {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => Err(format!("ollama returned {}", response.status())),
            Err(e) => Err(format!("ollama unreachable: {e}")),
        }
    }
}
