//! Health, models, and chat-completion handlers.

use std::time::Duration;

use axum::Extension;
use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::IntoResponse;
use axum::response::Response;
use serde_json::json;

use super::AppState;
use super::RequestId;
use super::error_response;
use super::json_response;
use crate::error::GatewayError;
use crate::openai::ChatCompletionRequest;
use crate::proxy::ChatOutcome;

const UPSTREAM_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// `GET /health`: 200 when Ollama's `/api/tags` answers in time.
pub async fn health(State(state): State<AppState>) -> Response {
    match state.proxy.upstream_health(UPSTREAM_PROBE_TIMEOUT).await {
        Ok(()) => Json(json!({ "status": "healthy" })).into_response(),
        Err(error) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "error": error,
                "ollama_host": state.proxy.ollama_host(),
            })),
        )
            .into_response(),
    }
}

/// `GET /v1/models`.
pub async fn models(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
) -> Response {
    match state.proxy.models().await {
        Ok(list) => Json(list).into_response(),
        Err(error) => error_response(&request_id, &error),
    }
}

/// `POST /v1/chat/completions`.
pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(
                &request_id,
                &GatewayError::Validation(rejection.body_text()),
            );
        }
    };

    match state.proxy.handle_chat(request).await {
        Ok(ChatOutcome::Json {
            status,
            content_type,
            body,
        }) => json_response(status, &content_type, body),
        Ok(ChatOutcome::Stream(upstream)) => stream_response(upstream),
        Err(error) => error_response(&request_id, &error),
    }
}

/// Pipe the upstream SSE body through untouched. Client disconnects drop
/// the stream, which cancels the upstream request.
fn stream_response(upstream: reqwest::Response) -> Response {
    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let body = Body::from_stream(upstream.bytes_stream());
    match Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
    {
        Ok(response) => response,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
