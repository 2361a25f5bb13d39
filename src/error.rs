//! Gateway error taxonomy and HTTP envelope
//!
//! Every error surfaced to a client is rendered as the JSON envelope
//! `{"error": {"code": ..., "message": ..., "type": ...}}` with a status
//! matching the error kind. Pre-flight errors (config decode, detection,
//! moderation) short-circuit the request before any upstream call; upstream
//! and translation errors carry 5xx statuses.

use axum::{
    body::Body,
    http::{Response, StatusCode},
    response::IntoResponse,
};
use serde_json::json;

/// Errors the gateway can return to a client
#[derive(Debug, Clone)]
pub struct GatewayError {
    pub code: String,
    pub message: String,
    pub status: StatusCode,
}

impl GatewayError {
    fn new(code: impl Into<String>, message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status,
        }
    }

    /// Request path does not match the `/<config-token>$<upstream-url>` grammar
    pub fn path_grammar(path: &str) -> Self {
        Self::new(
            "PATH_GRAMMAR_ERROR",
            format!("Path does not match /<config>$<upstream-url>: {}", path),
            StatusCode::NOT_FOUND,
        )
    }

    /// Config token was present but could not be decoded
    pub fn config_decode(message: impl Into<String>) -> Self {
        Self::new(
            "CONFIG_DECODE_ERROR",
            message,
            StatusCode::BAD_REQUEST,
        )
    }

    /// strict_parse was set and no adapter recognized the request
    pub fn format_detect() -> Self {
        Self::new(
            "FORMAT_DETECT_ERROR",
            "Request format could not be detected and strict_parse is enabled",
            StatusCode::BAD_REQUEST,
        )
    }

    /// disable_tools was set and the request carried tool content
    pub fn tools_disabled(detail: impl Into<String>) -> Self {
        Self::new("TOOLS_DISABLED", detail, StatusCode::BAD_REQUEST)
    }

    /// Moderation blocked the request; `code` is the configured error code
    pub fn moderation_blocked(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(code, reason, StatusCode::BAD_REQUEST)
    }

    /// Upstream request failed before any response bytes were committed
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new("UPSTREAM_ERROR", message, StatusCode::BAD_GATEWAY)
    }

    /// Non-streaming response could not be translated back to the client dialect
    pub fn response_transform(message: impl Into<String>) -> Self {
        Self::new(
            "RESPONSE_TRANSFORM_ERROR",
            message,
            StatusCode::INTERNAL_SERVER_ERROR,
        )
    }

    /// Upstream closed the stream before the validator committed
    pub fn stream_empty(buffered: &str) -> Self {
        Self::new(
            "STREAM_EMPTY_ERROR",
            format!(
                "Upstream stream ended without producing content; buffered: {}",
                buffered
            ),
            StatusCode::BAD_GATEWAY,
        )
    }

    /// Any other fault
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            "INTERNAL_ERROR",
            message,
            StatusCode::INTERNAL_SERVER_ERROR,
        )
    }

    /// The `type` field of the envelope, derived from the status class
    fn error_type(&self) -> &'static str {
        if self.status == StatusCode::BAD_GATEWAY {
            "upstream_error"
        } else if self.status.is_server_error() {
            "internal_error"
        } else {
            "invalid_request_error"
        }
    }

    /// Serialize the envelope body
    pub fn to_envelope(&self) -> serde_json::Value {
        json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "type": self.error_type(),
            }
        })
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for GatewayError {}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response<Body> {
        tracing::debug!("Gateway error: {} - {}", self.status, self);

        let body = self.to_envelope().to_string();
        Response::builder()
            .status(self.status)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap_or_else(|_| Response::new(Body::from("Internal error building error response")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let err = GatewayError::config_decode("bad token");
        let env = err.to_envelope();
        assert_eq!(env["error"]["code"], "CONFIG_DECODE_ERROR");
        assert_eq!(env["error"]["message"], "bad token");
        assert_eq!(env["error"]["type"], "invalid_request_error");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(GatewayError::path_grammar("/x").status, StatusCode::NOT_FOUND);
        assert_eq!(GatewayError::format_detect().status, StatusCode::BAD_REQUEST);
        assert_eq!(GatewayError::upstream("down").status, StatusCode::BAD_GATEWAY);
        assert_eq!(
            GatewayError::response_transform("boom").status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(GatewayError::stream_empty("").status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_moderation_code_is_configurable() {
        let err = GatewayError::moderation_blocked("CUSTOM_CODE", "[CUSTOM_CODE] Matched keyword: x");
        assert_eq!(err.to_envelope()["error"]["code"], "CUSTOM_CODE");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_error_types_by_class() {
        assert_eq!(GatewayError::upstream("x").error_type(), "upstream_error");
        assert_eq!(GatewayError::internal("x").error_type(), "internal_error");
        assert_eq!(
            GatewayError::tools_disabled("x").error_type(),
            "invalid_request_error"
        );
    }
}
