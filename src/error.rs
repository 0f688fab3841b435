//! Gateway error types.
//!
//! [`GatewayError`] covers the HTTP surface (the upgrade endpoint and
//! system routes) and maps each variant to a status code and structured
//! JSON body. [`DispatchError`], [`DeliveryError`] and [`EnvelopeError`]
//! describe the failure modes of the duplex routing core; they are logged
//! and folded into error envelopes, never written to the wire verbatim.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Structured JSON error response body.
///
/// All HTTP error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "missing identity: supply an `identity` query parameter or a bearer token"
///   }
/// }
/// ```
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
}

/// HTTP-facing error enum with status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category       | HTTP Status               |
/// |-----------|----------------|---------------------------|
/// | 1000–1999 | Validation     | 400 Bad Request           |
/// | 2000–2999 | Authentication | 401 Unauthorized          |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The upgrade request carried neither an identity nor a credential.
    #[error("missing identity: supply an `identity` query parameter or a bearer token")]
    MissingIdentity,

    /// The supplied bearer credential was rejected by the authenticator.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::MissingIdentity => 1001,
            Self::Unauthorized(_) => 2001,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingIdentity => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

/// Reasons a dispatch resolves to an error envelope.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No handler is registered under the command name.
    #[error("command not found: {0}")]
    CommandNotFound(String),

    /// The payload does not match the shape the command expects.
    #[error("payload decode failed for `{command}`: {source}")]
    PayloadDecode {
        /// Command whose payload failed to decode.
        command: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The domain handler returned an error.
    #[error("handler for `{command}` failed: {source:#}")]
    Handler {
        /// Command whose handler failed.
        command: String,
        /// Domain error returned by the handler.
        #[source]
        source: anyhow::Error,
    },

    /// The handler did not complete within the configured deadline.
    #[error("handler for `{command}` timed out after {timeout_ms} ms")]
    HandlerTimeout {
        /// Command whose handler timed out.
        command: String,
        /// Configured deadline in milliseconds.
        timeout_ms: u128,
    },

    /// The handler panicked while running.
    #[error("handler for `{0}` panicked")]
    HandlerPanicked(String),

    /// The handler result could not be serialized into the response.
    #[error("result of `{command}` could not be encoded: {source}")]
    ResultEncode {
        /// Command whose result failed to encode.
        command: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Reasons a response could not be handed to its target connection.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// No live connection is registered for the target identity.
    #[error("no live connection for target `{0}`")]
    TargetUnresolved(String),

    /// The target connection's writer has shut down.
    #[error("connection {0} is closed")]
    ConnectionClosed(uuid::Uuid),

    /// The target connection's outbound queue is full.
    #[error("outbound queue of connection {0} is full")]
    QueueFull(uuid::Uuid),

    /// The response could not be serialized.
    #[error("response encoding failed: {0}")]
    Encode(String),
}

/// An inbound frame that is not a well-formed request envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The frame is not valid JSON for a request envelope.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A binary frame did not contain UTF-8 text.
    #[error("binary frame is not valid UTF-8")]
    NotUtf8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_identity_is_client_error() {
        let err = GatewayError::MissingIdentity;
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), 1001);
    }

    #[test]
    fn unauthorized_maps_to_401() {
        let err = GatewayError::Unauthorized("unknown token".to_string());
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert!(err.to_string().contains("unknown token"));
    }

    #[test]
    fn into_response_carries_status() {
        let response = GatewayError::Unauthorized("expired".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn delivery_error_clones_equal() {
        let id = uuid::Uuid::new_v4();
        let err = DeliveryError::QueueFull(id);
        assert_eq!(err.clone(), err);
        assert_eq!(
            DeliveryError::TargetUnresolved("dave".to_string()).to_string(),
            "no live connection for target `dave`"
        );
    }

    #[test]
    fn handler_error_keeps_chain_in_display() {
        let source = anyhow::anyhow!("db down").context("loading ride");
        let err = DispatchError::Handler {
            command: "share_location".to_string(),
            source,
        };
        let text = err.to_string();
        assert!(text.contains("loading ride"));
        assert!(text.contains("db down"));
    }
}
