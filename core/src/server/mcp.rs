//! Admin and invocation endpoints over the server manager. All of them
//! answer 503 while MCP is disabled and 404 for unknown servers.

use std::sync::Arc;

use axum::Extension;
use axum::Json;
use axum::extract::Path;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::response::Response;
use llamagate_mcp_client::ServerManager;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;

use super::AppState;
use super::RequestId;
use super::error_response;
use crate::error::GatewayError;
use crate::tool_loop::parse_namespaced_name;

fn manager_or_503(state: &AppState, request_id: &str) -> Result<Arc<ServerManager>, Response> {
    match state.proxy.mcp() {
        Some(manager) => Ok(manager.clone()),
        None => Err(error_response(request_id, &GatewayError::McpDisabled)),
    }
}

fn unknown(request_id: &str, name: &str) -> Response {
    error_response(request_id, &GatewayError::UnknownServer(name.to_string()))
}

/// `GET /v1/mcp/servers`
pub async fn list_servers(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
) -> Response {
    let manager = match manager_or_503(&state, &request_id) {
        Ok(manager) => manager,
        Err(response) => return response,
    };
    let mut servers = Vec::new();
    for name in manager.list_servers() {
        if let Some(snapshot) = manager.get_server(&name).await {
            servers.push(snapshot);
        }
    }
    Json(json!({ "servers": servers })).into_response()
}

/// `GET /v1/mcp/servers/:name`
pub async fn get_server(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(name): Path<String>,
) -> Response {
    let manager = match manager_or_503(&state, &request_id) {
        Ok(manager) => manager,
        Err(response) => return response,
    };
    match manager.get_server(&name).await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => unknown(&request_id, &name),
    }
}

/// `GET /v1/mcp/servers/health`
pub async fn all_health(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
) -> Response {
    let manager = match manager_or_503(&state, &request_id) {
        Ok(manager) => manager,
        Err(response) => return response,
    };
    Json(manager.all_health()).into_response()
}

/// `GET /v1/mcp/servers/:name/health`
pub async fn server_health(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(name): Path<String>,
) -> Response {
    let manager = match manager_or_503(&state, &request_id) {
        Ok(manager) => manager,
        Err(response) => return response,
    };
    match manager.get_health(&name) {
        Some(record) => Json(record).into_response(),
        None => unknown(&request_id, &name),
    }
}

/// `GET /v1/mcp/servers/:name/stats`
pub async fn server_stats(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(name): Path<String>,
) -> Response {
    let manager = match manager_or_503(&state, &request_id) {
        Ok(manager) => manager,
        Err(response) => return response,
    };
    let Some(snapshot) = manager.get_server(&name).await else {
        return unknown(&request_id, &name);
    };
    Json(json!({
        "name": snapshot.name,
        "transport": snapshot.transport,
        "pool": manager.pool_stats(&name),
    }))
    .into_response()
}

/// `GET /v1/mcp/servers/:name/tools`
pub async fn server_tools(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(name): Path<String>,
) -> Response {
    let manager = match manager_or_503(&state, &request_id) {
        Ok(manager) => manager,
        Err(response) => return response,
    };
    if !manager.contains(&name) {
        return unknown(&request_id, &name);
    }
    match manager.server_tools(&name).await {
        Ok(tools) => Json(json!({ "tools": tools })).into_response(),
        Err(error) => error_response(&request_id, &GatewayError::Internal(error)),
    }
}

/// `GET /v1/mcp/servers/:name/resources`
pub async fn server_resources(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(name): Path<String>,
) -> Response {
    let manager = match manager_or_503(&state, &request_id) {
        Ok(manager) => manager,
        Err(response) => return response,
    };
    if !manager.contains(&name) {
        return unknown(&request_id, &name);
    }
    match manager.server_resources(&name).await {
        Ok(resources) => Json(json!({ "resources": resources })).into_response(),
        Err(error) => error_response(&request_id, &GatewayError::Internal(error)),
    }
}

/// `GET /v1/mcp/servers/:name/prompts`
pub async fn server_prompts(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(name): Path<String>,
) -> Response {
    let manager = match manager_or_503(&state, &request_id) {
        Ok(manager) => manager,
        Err(response) => return response,
    };
    if !manager.contains(&name) {
        return unknown(&request_id, &name);
    }
    match manager.server_prompts(&name).await {
        Ok(prompts) => Json(json!({ "prompts": prompts })).into_response(),
        Err(error) => error_response(&request_id, &GatewayError::Internal(error)),
    }
}

/// `GET /v1/mcp/servers/:name/resources/*uri`
pub async fn read_resource(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path((name, uri)): Path<(String, String)>,
) -> Response {
    let manager = match manager_or_503(&state, &request_id) {
        Ok(manager) => manager,
        Err(response) => return response,
    };
    if !manager.contains(&name) {
        return unknown(&request_id, &name);
    }
    match manager.read_resource(&name, &uri, None).await {
        Ok(result) => Json(result).into_response(),
        Err(error) => error_response(&request_id, &GatewayError::Internal(error)),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PromptRequest {
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// `POST /v1/mcp/servers/:name/prompts/:prompt_name`
pub async fn get_prompt(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path((name, prompt_name)): Path<(String, String)>,
    payload: Option<Json<PromptRequest>>,
) -> Response {
    let manager = match manager_or_503(&state, &request_id) {
        Ok(manager) => manager,
        Err(response) => return response,
    };
    if !manager.contains(&name) {
        return unknown(&request_id, &name);
    }
    let arguments = payload.and_then(|Json(request)| request.arguments);
    match manager.get_prompt(&name, &prompt_name, arguments, None).await {
        Ok(result) => Json(result).into_response(),
        Err(error) => error_response(&request_id, &GatewayError::Internal(error)),
    }
}

/// Body for `POST /v1/mcp/execute`: either `server` + `tool`, or a
/// namespaced `name`.
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// `POST /v1/mcp/execute`
pub async fn execute_tool(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Json(request): Json<ExecuteRequest>,
) -> Response {
    let manager = match manager_or_503(&state, &request_id) {
        Ok(manager) => manager,
        Err(response) => return response,
    };

    let resolved = match (&request.server, &request.tool, &request.name) {
        (Some(server), Some(tool), _) => Some((server.clone(), tool.clone())),
        (_, _, Some(name)) => parse_namespaced_name(name),
        _ => None,
    };
    let Some((server, tool)) = resolved else {
        return error_response(
            &request_id,
            &GatewayError::Validation(
                "provide either server and tool, or a namespaced name".to_string(),
            ),
        );
    };

    if !manager.contains(&server) {
        return unknown(&request_id, &server);
    }
    match manager.call_tool(&server, &tool, request.arguments, None).await {
        Ok(result) => Json(result).into_response(),
        Err(error) => error_response(&request_id, &GatewayError::Internal(error)),
    }
}

/// `POST /v1/mcp/servers/:name/refresh`
pub async fn refresh_server(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(name): Path<String>,
) -> Response {
    let manager = match manager_or_503(&state, &request_id) {
        Ok(manager) => manager,
        Err(response) => return response,
    };
    if !manager.contains(&name) {
        return unknown(&request_id, &name);
    }
    match manager.refresh_server(&name).await {
        Ok(()) => Json(json!({ "status": "refreshed", "server": name })).into_response(),
        Err(error) => error_response(&request_id, &GatewayError::Internal(error)),
    }
}
