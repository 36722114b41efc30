//! Wire conventions for the pull and push channels.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SendError;

pub const HEADER_AUTHORIZATION: &str = "Authorization";

/// Value of the `Authorization` header for a bearer credential.
pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

/// Methods recognised by the pull protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Whether this method writes (everything but `GET`).
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Method::Get)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of decoding a push payload.
///
/// A payload that does not decode into `T` is surfaced unchanged as `Raw`.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    Value(T),
    Raw(String),
}

impl<T> Decoded<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Decoded::Value(value) => Some(value),
            Decoded::Raw(_) => None,
        }
    }

    pub fn raw(&self) -> Option<&str> {
        match self {
            Decoded::Value(_) => None,
            Decoded::Raw(raw) => Some(raw),
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Decoded::Raw(_))
    }
}

/// A payload headed for the push channel.
///
/// Structured payloads go out as JSON text, text payloads go out verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Json(Value),
    Text(String),
}

impl Outgoing {
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, SendError> {
        serde_json::to_value(value)
            .map(Outgoing::Json)
            .map_err(|e| SendError::Encode(e.to_string()))
    }

    pub fn into_wire(self) -> Result<String, SendError> {
        match self {
            Outgoing::Json(value) => {
                serde_json::to_string(&value).map_err(|e| SendError::Encode(e.to_string()))
            }
            Outgoing::Text(text) => Ok(text),
        }
    }
}

impl From<Value> for Outgoing {
    fn from(value: Value) -> Self {
        Outgoing::Json(value)
    }
}

impl From<String> for Outgoing {
    fn from(text: String) -> Self {
        Outgoing::Text(text)
    }
}

impl From<&str> for Outgoing {
    fn from(text: &str) -> Self {
        Outgoing::Text(text.to_string())
    }
}

/// Join a base address and a path with exactly one `/` between them.
///
/// Absolute `http(s)://` and `ws(s)://` paths are returned as-is, and an empty
/// base yields a rooted relative path.
pub fn join_url(base: &str, path: &str) -> String {
    if ["http://", "https://", "ws://", "wss://"]
        .iter()
        .any(|scheme| path.starts_with(scheme))
    {
        return path.to_string();
    }
    if base.is_empty() {
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        }
    } else {
        let base = base.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{path}")
        }
    }
}

/// Convert an `http(s)` address to its `ws(s)` counterpart.
///
/// Anything that is not an `http(s)` URL is returned unchanged.
pub fn http_to_ws(address: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(address) else {
        return address.to_string();
    };
    let scheme = match parsed.scheme() {
        "https" => "wss",
        "http" => "ws",
        _ => return address.to_string(),
    };
    if parsed.set_scheme(scheme).is_err() {
        return address.to_string();
    }
    let converted = parsed.to_string();
    // Url always renders a trailing slash for an empty path
    if !address.ends_with('/') {
        converted.trim_end_matches('/').to_string()
    } else {
        converted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Status {
        status: String,
    }

    #[test]
    fn decoded_accessors() {
        let value = Decoded::Value(Status {
            status: "running".into(),
        });
        assert_eq!(value.value().map(|s| s.status.as_str()), Some("running"));
        assert_eq!(value.raw(), None);

        let raw: Decoded<Status> = Decoded::Raw("heartbeat".into());
        assert!(raw.is_raw());
        assert_eq!(raw.raw(), Some("heartbeat"));
    }

    #[test]
    fn outgoing_wire_form() {
        let json = Outgoing::from(serde_json::json!({"type": "ping"}));
        assert_eq!(json.into_wire().unwrap(), r#"{"type":"ping"}"#);
        assert_eq!(Outgoing::from("ping").into_wire().unwrap(), "ping");
    }

    #[test]
    fn join_url_normalises_slashes() {
        assert_eq!(join_url("http://host/", "/api/agents"), "http://host/api/agents");
        assert_eq!(join_url("http://host", "api/agents"), "http://host/api/agents");
        assert_eq!(join_url("", "api"), "/api");
        assert_eq!(join_url("wss://host/ws", ""), "wss://host/ws");
        assert_eq!(join_url("http://host", "https://other/x"), "https://other/x");
    }

    #[test]
    fn http_addresses_become_ws() {
        assert_eq!(http_to_ws("https://app.example.com/ws"), "wss://app.example.com/ws");
        assert_eq!(http_to_ws("http://localhost:8000"), "ws://localhost:8000");
        assert_eq!(http_to_ws("wss://already"), "wss://already");
        assert_eq!(http_to_ws("/relative"), "/relative");
    }

    #[test]
    fn method_names() {
        assert_eq!(Method::Patch.to_string(), "PATCH");
        assert!(!Method::Get.is_mutation());
        assert!(Method::Delete.is_mutation());
    }
}
