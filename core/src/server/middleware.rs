//! Request-id, authentication, and rate-limit layers.

use std::time::Instant;

use axum::extract::Request;
use axum::extract::State;
use axum::http::HeaderValue;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use llamagate_mcp_client::request_context;
use tracing::info;
use uuid::Uuid;

use super::AppState;
use super::error_response;
use crate::error::GatewayError;

const X_REQUEST_ID: &str = "x-request-id";
const X_API_KEY: &str = "x-api-key";

/// The id assigned to the current request, available to handlers as an
/// extension.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Adopt the inbound `X-Request-ID` or mint a fresh one, scope it as the
/// ambient id for upstream propagation, echo it on the response, and log
/// the request with its latency.
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(id.clone()));
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let started = Instant::now();
    let mut response = request_context::with_request_id(id.clone(), next.run(request)).await;
    let latency_ms = started.elapsed().as_millis();

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    info!(
        request_id = %id,
        %method,
        %path,
        status = response.status().as_u16(),
        latency_ms,
        "request completed"
    );
    response
}

fn extension_id(request: &Request) -> String {
    request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default()
}

/// Shared-secret check. Accepts the key via `X-API-Key` or
/// `Authorization: Bearer`; comparison is constant-time. Disabled when no
/// key is configured.
pub async fn auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };

    let authorized = {
        let headers = request.headers();
        let provided = headers
            .get(X_API_KEY)
            .and_then(|value| value.to_str().ok())
            .or_else(|| {
                headers
                    .get(AUTHORIZATION)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.strip_prefix("Bearer "))
            });
        provided.is_some_and(|provided| constant_time_eq(expected.as_bytes(), provided.as_bytes()))
    };

    if authorized {
        next.run(request).await
    } else {
        error_response(&extension_id(&request), &GatewayError::Unauthorized)
    }
}

/// Global token bucket. Violations get a 429 with `Retry-After`.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(limiter) = state.limiter.as_ref() else {
        return next.run(request).await;
    };
    match limiter.try_acquire() {
        Ok(()) => next.run(request).await,
        Err(retry_after) => error_response(
            &extension_id(&request),
            &GatewayError::RateLimited { retry_after },
        ),
    }
}

/// Constant-time equality so the comparison leaks nothing about how much
/// of the secret matched.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}
