//! axum wiring: state, router, and layers.

mod handlers;
mod mcp;
mod middleware;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::RETRY_AFTER;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use tower_http::trace::TraceLayer;

use crate::error::GatewayError;
use crate::proxy::ProxyEngine;
use crate::rate_limit::RateLimiter;

pub use middleware::RequestId;

#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<ProxyEngine>,
    pub api_key: Option<String>,
    pub limiter: Option<Arc<RateLimiter>>,
}

impl AppState {
    pub fn new(proxy: Arc<ProxyEngine>) -> Self {
        Self {
            proxy,
            api_key: None,
            limiter: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_second: Option<f64>) -> Self {
        self.limiter = requests_per_second.map(|rate| Arc::new(RateLimiter::new(rate)));
        self
    }
}

/// Build the gateway router. `/health` bypasses authentication and rate
/// limiting; everything else sits behind both.
pub fn configure_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/models", get(handlers::models))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/mcp/servers", get(mcp::list_servers))
        .route("/v1/mcp/servers/health", get(mcp::all_health))
        .route("/v1/mcp/servers/:name", get(mcp::get_server))
        .route("/v1/mcp/servers/:name/health", get(mcp::server_health))
        .route("/v1/mcp/servers/:name/stats", get(mcp::server_stats))
        .route("/v1/mcp/servers/:name/tools", get(mcp::server_tools))
        .route("/v1/mcp/servers/:name/resources", get(mcp::server_resources))
        .route(
            "/v1/mcp/servers/:name/resources/*uri",
            get(mcp::read_resource),
        )
        .route("/v1/mcp/servers/:name/prompts", get(mcp::server_prompts))
        .route(
            "/v1/mcp/servers/:name/prompts/:prompt_name",
            post(mcp::get_prompt),
        )
        .route("/v1/mcp/servers/:name/refresh", post(mcp::refresh_server))
        .route("/v1/mcp/execute", post(mcp::execute_tool))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .layer(axum::middleware::from_fn(middleware::request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Render a [`GatewayError`] as its OpenAI-shaped envelope.
pub(crate) fn error_response(request_id: &str, error: &GatewayError) -> Response {
    let status = error.status();
    let body = Json(error.body(request_id));
    let mut response = (status, body).into_response();
    if let GatewayError::RateLimited { retry_after } = error {
        let seconds = (*retry_after).max(1);
        if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
    }
    response
}

pub(crate) fn json_response(status: u16, content_type: &str, body: bytes::Bytes) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    match Response::builder()
        .status(status)
        .header(axum::http::header::CONTENT_TYPE, content_type)
        .body(axum::body::Body::from(body))
    {
        Ok(response) => response,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
