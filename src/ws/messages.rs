//! WebSocket envelope types: inbound requests and routed responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{DispatchResponse, Status};
use crate::error::EnvelopeError;

/// Client → server request envelope.
///
/// `payload` is opaque to the router; the command registry decodes it
/// into whatever shape the named command expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Name of the command to run.
    pub command: String,
    /// Command-specific payload. Missing means `null`.
    #[serde(default)]
    pub payload: Value,
    /// Identity the response should be delivered to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
}

impl RequestEnvelope {
    /// Parses a text frame into a request envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] if `text` is not a JSON object
    /// with at least a string `command`.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parses a binary frame carrying UTF-8 JSON.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::NotUtf8`] for non-UTF-8 bytes, otherwise
    /// the same errors as [`RequestEnvelope::parse`].
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let text = std::str::from_utf8(bytes).map_err(|_| EnvelopeError::NotUtf8)?;
        Self::parse(text)
    }
}

/// Server → client response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Command the response belongs to. Empty if it could not be read.
    pub command: String,
    /// Outcome of the dispatch.
    pub status: Status,
    /// Handler result on success, `null` otherwise.
    pub data: Value,
    /// Identity the response is delivered to.
    pub target_id: String,
}

impl ResponseEnvelope {
    /// Attaches a delivery target to a dispatch result.
    #[must_use]
    pub fn routed(response: DispatchResponse, target_id: impl Into<String>) -> Self {
        Self {
            command: response.command,
            status: response.status,
            data: response.data,
            target_id: target_id.into(),
        }
    }

    /// Error envelope for an inbound frame that could not be parsed.
    ///
    /// `command` and `target_id` are recovered from the raw frame when it
    /// is a JSON object carrying them as strings, and are empty otherwise.
    #[must_use]
    pub fn parse_failure(raw: &[u8]) -> Self {
        let recovered = serde_json::from_slice::<Value>(raw).ok();
        let field = |name: &str| {
            recovered
                .as_ref()
                .and_then(|v| v.get(name))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Self {
            command: field("command"),
            status: Status::Error,
            data: Value::Null,
            target_id: field("target_id"),
        }
    }

    /// Serializes the envelope as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if `data` cannot be serialized,
    /// which cannot happen for values produced by the registry.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
