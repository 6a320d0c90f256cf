//! Guardrail-bounded tool execution loop.
//!
//! Each round sends the current trajectory to Ollama, validates any tool
//! calls the assistant produced, dispatches them sequentially through the
//! server manager, and appends the results as `tool` messages. A reply
//! without tool calls ends the loop and becomes the chat-completion
//! response. Per-tool failures are injected back into the trajectory so
//! the model can recover; only guardrail breaches abort the request.

use std::sync::Arc;
use std::time::Duration;

use llamagate_mcp_client::ServerManager;
use mcp_types::Tool;
use serde_json::json;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::GatewayError;
use crate::error::GuardrailKind;
use crate::ollama::OllamaChatRequest;
use crate::ollama::OllamaClient;
use crate::ollama::OllamaMessage;
use crate::ollama::OllamaOptions;
use crate::ollama::to_ollama_messages;
use crate::openai::ChatCompletionRequest;
use crate::openai::ChatCompletionResponse;
use crate::openai::ChatMessage;
use crate::openai::FunctionDef;
use crate::openai::MessageContent;
use crate::openai::ToolDef;

/// Namespace prefix for MCP tools exposed to the model.
const TOOL_NAMESPACE: &str = "mcp.";

#[derive(Debug, Clone)]
pub struct ToolLoopConfig {
    pub max_rounds: usize,
    pub max_calls_per_round: usize,
    pub max_total_calls: usize,
    pub max_result_bytes: usize,
    pub call_timeout: Duration,
    /// Namespaced names. An empty allow list permits every tool.
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

impl Default for ToolLoopConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            max_calls_per_round: 10,
            max_total_calls: 25,
            max_result_bytes: 64 * 1024,
            call_timeout: Duration::from_secs(30),
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }
}

impl ToolLoopConfig {
    fn is_allowed(&self, namespaced: &str) -> bool {
        if self.deny.iter().any(|denied| denied == namespaced) {
            return false;
        }
        self.allow.is_empty() || self.allow.iter().any(|allowed| allowed == namespaced)
    }
}

/// `mcp.<server>.<tool>`. Server names cannot contain dots, so the first
/// dot after the prefix splits the pair; the tool part may contain more.
pub fn namespaced_tool_name(server: &str, tool: &str) -> String {
    format!("{TOOL_NAMESPACE}{server}.{tool}")
}

pub fn parse_namespaced_name(name: &str) -> Option<(String, String)> {
    let rest = name.strip_prefix(TOOL_NAMESPACE)?;
    let (server, tool) = rest.split_once('.')?;
    if server.is_empty() || tool.is_empty() {
        return None;
    }
    Some((server.to_string(), tool.to_string()))
}

/// OpenAI-function-shaped defs for the whole MCP catalog.
pub fn tool_defs(catalog: &[(String, Tool)]) -> Vec<ToolDef> {
    catalog
        .iter()
        .map(|(server, tool)| ToolDef {
            kind: "function".to_string(),
            function: FunctionDef {
                name: namespaced_tool_name(server, &tool.name),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            },
        })
        .collect()
}

/// System message listing the catalog for models without native tool
/// support. Prepended on every path that exposes tools so cached
/// fingerprints match what Ollama actually receives.
pub fn tool_listing_message(catalog: &[(String, Tool)]) -> ChatMessage {
    let mut listing = String::from("You have access to the following tools:\n");
    for (server, tool) in catalog {
        listing.push_str(&format!(
            "- {}: {}\n",
            namespaced_tool_name(server, &tool.name),
            tool.description.as_deref().unwrap_or("")
        ));
    }
    ChatMessage::system(listing)
}

fn truncate_to_bytes(mut text: String, max: usize) -> String {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text
}

fn error_content(message: impl AsRef<str>) -> String {
    json!({ "error": message.as_ref() }).to_string()
}

pub async fn run_tool_loop(
    ollama: &OllamaClient,
    manager: &Arc<ServerManager>,
    config: &ToolLoopConfig,
    request: &ChatCompletionRequest,
    catalog: &[(String, Tool)],
) -> Result<ChatCompletionResponse, GatewayError> {
    let defs = tool_defs(catalog);
    let mut trajectory = Vec::with_capacity(request.messages.len() + 1);
    trajectory.extend(to_ollama_messages(&[tool_listing_message(catalog)]));
    trajectory.extend(to_ollama_messages(&request.messages));

    let mut total_calls = 0usize;

    for round in 0..config.max_rounds {
        let upstream = OllamaChatRequest {
            model: request.model.clone(),
            messages: trajectory.clone(),
            stream: false,
            options: OllamaOptions::from_request(request.temperature, request.max_tokens),
            tools: Some(defs.clone()),
        };
        let response = ollama
            .chat(&upstream)
            .await
            .map_err(|e| GatewayError::Upstream(format!("{e:#}")))?;
        let mut assistant = response.message;

        let calls = assistant.tool_calls.clone().unwrap_or_default();
        if calls.is_empty() {
            debug!(round, total_calls, "tool loop settled");
            return Ok(ChatCompletionResponse::from_assistant(
                &request.model,
                assistant_to_chat_message(assistant),
            ));
        }

        if calls.len() > config.max_calls_per_round {
            return Err(GatewayError::Guardrail {
                kind: GuardrailKind::TooManyToolCallsPerRound,
                message: format!(
                    "assistant requested {} tool calls in one round (limit {})",
                    calls.len(),
                    config.max_calls_per_round
                ),
            });
        }
        if total_calls + calls.len() > config.max_total_calls {
            return Err(GatewayError::Guardrail {
                kind: GuardrailKind::MaxTotalToolCallsExceeded,
                message: format!(
                    "request exceeded the limit of {} total tool calls",
                    config.max_total_calls
                ),
            });
        }

        // Object arguments are re-serialized to JSON strings before the
        // assistant turn is stored.
        if let Some(stored) = assistant.tool_calls.as_mut() {
            for call in stored.iter_mut() {
                call.function.normalize_arguments();
            }
        }
        trajectory.push(assistant);

        for call in &calls {
            let content = dispatch_tool_call(manager, config, &call.function.name, call)
                .await;
            trajectory.push(OllamaMessage {
                role: "tool".to_string(),
                content,
                tool_calls: None,
                tool_call_id: Some(call.id.clone()),
            });
        }
        total_calls += calls.len();
        info!(round, calls = calls.len(), total_calls, "tool round dispatched");
    }

    Err(GatewayError::Guardrail {
        kind: GuardrailKind::MaxToolRoundsExceeded,
        message: format!(
            "conversation did not settle within {} tool rounds",
            config.max_rounds
        ),
    })
}

/// One tool call. Invalid names, denied tools, bad arguments, and remote
/// failures all come back as error content for the trajectory; they never
/// abort the loop.
async fn dispatch_tool_call(
    manager: &Arc<ServerManager>,
    config: &ToolLoopConfig,
    name: &str,
    call: &crate::openai::ToolCall,
) -> String {
    let Some((server, tool)) = parse_namespaced_name(name) else {
        warn!(tool = %name, "invalid tool name from assistant");
        return error_content(format!(
            "invalid tool name '{name}': expected mcp.<server>.<tool>"
        ));
    };

    if !config.is_allowed(name) {
        warn!(tool = %name, "tool call denied by policy");
        return error_content(format!("tool '{name}' is not allowed"));
    }

    let arguments = match call.function.arguments_value() {
        Ok(arguments) => arguments,
        Err(e) => {
            return error_content(format!("invalid tool arguments: {e}"));
        }
    };

    match manager
        .call_tool(&server, &tool, arguments, Some(config.call_timeout))
        .await
    {
        Ok(result) => {
            let text = truncate_to_bytes(result.text(), config.max_result_bytes);
            if result.is_error.unwrap_or(false) {
                error_content(text)
            } else {
                text
            }
        }
        Err(e) => {
            warn!(tool = %name, "tool call failed: {e:#}");
            error_content(format!("{e:#}"))
        }
    }
}

fn assistant_to_chat_message(message: OllamaMessage) -> ChatMessage {
    ChatMessage {
        role: "assistant".to_string(),
        content: if message.content.is_empty() && message.tool_calls.is_some() {
            None
        } else {
            Some(MessageContent::Text(message.content))
        },
        tool_calls: message.tool_calls,
        tool_call_id: None,
    }
}
