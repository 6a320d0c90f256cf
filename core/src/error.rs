//! Gateway error taxonomy and its mapping onto OpenAI-shaped responses.

use axum::http::StatusCode;

use crate::openai::ErrorBody;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardrailKind {
    TooManyToolCallsPerRound,
    MaxTotalToolCallsExceeded,
    MaxToolRoundsExceeded,
}

impl GuardrailKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardrailKind::TooManyToolCallsPerRound => "too_many_tool_calls_per_round",
            GuardrailKind::MaxTotalToolCallsExceeded => "max_total_tool_calls_exceeded",
            GuardrailKind::MaxToolRoundsExceeded => "max_tool_rounds_exceeded",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),

    #[error("missing or invalid API key")]
    Unauthorized,

    #[error("rate limit exceeded")]
    RateLimited { retry_after: u64 },

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("mcp support is disabled")]
    McpDisabled,

    #[error("unknown mcp server '{0}'")]
    UnknownServer(String),

    /// A tool-loop guardrail halted the request. Rendered as an
    /// OpenAI-shaped error body; never retried.
    #[error("{message}")]
    Guardrail {
        kind: GuardrailKind,
        message: String,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::McpDisabled => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UnknownServer(_) => StatusCode::NOT_FOUND,
            // Guardrail breaches carry a well-formed error body; clients
            // inspect `error.type`, not the status.
            GatewayError::Guardrail { .. } => StatusCode::OK,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) | GatewayError::Unauthorized => "invalid_request_error",
            GatewayError::RateLimited { .. } => "rate_limit_error",
            GatewayError::Guardrail { kind, .. } => kind.as_str(),
            GatewayError::Upstream(_)
            | GatewayError::McpDisabled
            | GatewayError::UnknownServer(_)
            | GatewayError::Internal(_) => "server_error",
        }
    }

    pub fn body(&self, request_id: &str) -> ErrorBody {
        ErrorBody::new(self.to_string(), self.error_type(), Some(request_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guardrail_types_match_wire_names() {
        assert_eq!(
            GuardrailKind::MaxToolRoundsExceeded.as_str(),
            "max_tool_rounds_exceeded"
        );
        assert_eq!(
            GuardrailKind::TooManyToolCallsPerRound.as_str(),
            "too_many_tool_calls_per_round"
        );
        assert_eq!(
            GuardrailKind::MaxTotalToolCallsExceeded.as_str(),
            "max_total_tool_calls_exceeded"
        );
    }

    #[test]
    fn statuses_follow_the_error_kind() {
        assert_eq!(
            GatewayError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::RateLimited { retry_after: 1 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::UnknownServer("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::Guardrail {
                kind: GuardrailKind::MaxToolRoundsExceeded,
                message: "m".into()
            }
            .status(),
            StatusCode::OK
        );
    }
}
