//! Expansion of `mcp://` references into conversation context.
//!
//! Every user or assistant message is scanned for MCP URIs; each
//! referenced resource is fetched and its textual contents collected into
//! a labeled blob. When at least one resource resolves, a single system
//! message carrying all blobs is prepended. The URIs themselves stay in
//! place so the model still sees what was referenced.

use std::sync::Arc;
use std::time::Duration;

use llamagate_mcp_client::ServerManager;
use llamagate_mcp_client::extract_uris;
use tracing::debug;
use tracing::warn;

use crate::openai::ChatMessage;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Prepend resource context to `messages`. Individual fetch failures are
/// logged and skipped; with nothing resolved the input is returned
/// unchanged.
pub async fn expand_resources(
    manager: &Arc<ServerManager>,
    messages: Vec<ChatMessage>,
    fetch_timeout: Duration,
) -> Vec<ChatMessage> {
    let mut blobs: Vec<String> = Vec::new();

    for message in &messages {
        if message.role != "user" && message.role != "assistant" {
            continue;
        }
        let Some(text) = message.text() else {
            continue;
        };

        for uri in extract_uris(&text) {
            if !manager.contains(&uri.server) {
                warn!(uri = %uri, "skipping resource on unknown server");
                continue;
            }
            match manager
                .read_resource(&uri.server, &uri.resource, Some(fetch_timeout))
                .await
            {
                Ok(result) => {
                    let mut body = String::new();
                    for contents in result.contents {
                        if let Some(text) = contents.text {
                            body.push_str(&text);
                            body.push('\n');
                        }
                    }
                    debug!(uri = %uri, bytes = body.len(), "resource expanded");
                    blobs.push(format!("Resource from {uri}:\n{body}"));
                }
                Err(e) => warn!(uri = %uri, "resource fetch failed: {e:#}"),
            }
        }
    }

    if blobs.is_empty() {
        return messages;
    }

    let mut expanded = Vec::with_capacity(messages.len() + 1);
    expanded.push(ChatMessage::system(blobs.join("\n\n")));
    expanded.extend(messages);
    expanded
}
