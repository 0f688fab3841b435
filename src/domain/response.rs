//! Dispatch outcome shared by the registry and the router.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome discriminator carried on every response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// The handler ran and returned a result.
    Success,
    /// Lookup, decode or the handler failed.
    Error,
}

/// Result of a single dispatch, before a delivery target is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResponse {
    /// Command name, echoed back unchanged.
    pub command: String,
    /// Whether the dispatch succeeded.
    pub status: Status,
    /// Handler result on success, `null` on error.
    pub data: Value,
}

impl DispatchResponse {
    /// Successful dispatch carrying the handler's result.
    #[must_use]
    pub fn success(command: impl Into<String>, data: Value) -> Self {
        Self {
            command: command.into(),
            status: Status::Success,
            data,
        }
    }

    /// Failed dispatch. Error details never reach the wire.
    #[must_use]
    pub fn error(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            status: Status::Error,
            data: Value::Null,
        }
    }

    /// Returns `true` when `status` is [`Status::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}
