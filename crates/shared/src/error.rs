//! Error taxonomy for the push and pull channels.

use serde::Deserialize;
use serde_json::Value;

/// Failure of a pull (request/response) call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The request failed before any response was obtained.
    #[error("Network error: {0}")]
    Transport(String),
    /// The service answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Response { status: u16, body: String },
    /// A success body could not be decoded into the expected type.
    #[error("Deserialization error: {0}")]
    Decode(String),
    /// Caller-supplied input was rejected before any network call.
    #[error("Invalid request: {0}")]
    Validation(String),
}

impl ApiError {
    /// HTTP status, when a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Response { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Raw response body, when a response was received.
    pub fn body(&self) -> Option<&str> {
        match self {
            ApiError::Response { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// User-facing message extracted from the response body, if any.
    pub fn detail(&self) -> Option<String> {
        self.body().and_then(try_problem_detail)
    }
}

/// Failure on the push channel. Recoverable through the reconnect policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Outcome of a push send that did not go out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,
    #[error("failed to encode payload: {0}")]
    Encode(String),
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<Value>,
    #[serde(default)]
    title: Option<String>,
}

/// Attempt to parse an error body into a user-facing message.
///
/// Understands `{"detail": "..."}`, validation lists of the form
/// `{"detail": [{"msg": "..."}]}` and RFC 7807 bodies (prefers `detail`,
/// falls back to `title`).
pub fn try_problem_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok()?;
    let detail = match parsed.detail {
        Some(Value::String(detail)) => Some(detail),
        Some(Value::Array(items)) => items
            .iter()
            .find_map(|item| item.get("msg").and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    };
    if let Some(detail) = detail {
        if !detail.trim().is_empty() {
            return Some(detail);
        }
    }
    parsed.title.filter(|title| !title.trim().is_empty())
}
