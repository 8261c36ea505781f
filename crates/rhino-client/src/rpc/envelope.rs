use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;
use strum_macros::Display;
use uuid::Uuid;

use super::codec::CodecError;
use super::protocol::{
    INTERNAL_ERROR_CODE, INVALID_REQUEST_CODE, JSONRPC_VERSION, TIMEOUT_CODE, TIMEOUT_MESSAGE,
};

/// One wire-level JSON-RPC message.
#[derive(Debug, Clone, PartialEq, Display)]
pub enum Envelope {
    /// outbound call, or the peer's heartbeat echo
    Request(Request),
    /// reply correlated to a request by `id`
    Response(Response),
    /// server push without an id, never awaited
    Notification(Notification),
}

impl Envelope {
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Request(request) => Some(&request.id),
            Self::Response(response) => Some(&response.id),
            Self::Notification(_) => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(request) => Some(&request.method),
            Self::Notification(notification) => Some(&notification.method),
            Self::Response(_) => None,
        }
    }
}

impl From<Request> for Envelope {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

impl From<Response> for Envelope {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl From<Notification> for Envelope {
    fn from(notification: Notification) -> Self {
        Self::Notification(notification)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Correlation id. An empty id is replaced by a fresh UUID at encode time.
    pub id: String,
    pub method: String,
    pub params: Value,
}

impl Request {
    /// Create a request with a freshly generated id
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), method, params)
    }

    pub fn with_id(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: String,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(RpcError::new(code, message)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Value,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Error object of a response.
///
/// On the wire the code lives under `error`; peers that use the plain
/// JSON-RPC `code` key are accepted too. Both fields default, since some
/// peers send an empty error object alongside a successful result.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct RpcError {
    #[serde(rename = "error", alias = "code", default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.code, self.message)
    }
}

/// Outcome of a call as seen by the caller: the response's `result` and
/// `error` exactly as received, or a locally produced error.
///
/// Both fields may legitimately be empty, so callers inspect both.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reply {
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

impl Reply {
    /// `(None, {code: -1, message: "jsonrpc, timeout"})`
    pub fn timeout() -> Self {
        Self::local_error(TIMEOUT_CODE, TIMEOUT_MESSAGE)
    }

    pub(crate) fn rejected(message: impl Into<String>) -> Self {
        Self::local_error(INVALID_REQUEST_CODE, message)
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::local_error(INTERNAL_ERROR_CODE, message)
    }

    fn local_error(code: i64, message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(RpcError::new(code, message)),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.result.is_none()
            && self
                .error
                .as_ref()
                .is_some_and(|e| e.code == TIMEOUT_CODE && e.message == TIMEOUT_MESSAGE)
    }

    /// No error, or the zero-code "no error" object some peers send.
    pub fn is_ok(&self) -> bool {
        self.error.as_ref().is_none_or(|e| e.code == 0)
    }

    pub fn into_parts(self) -> (Option<Value>, Option<RpcError>) {
        (self.result, self.error)
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Self {
            result: response.result,
            error: response.error,
        }
    }
}

/// Flat serde shape shared by all envelope kinds.
#[derive(Serialize, Deserialize, Debug, Default)]
pub(crate) struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jsonrpc: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_id"
    )]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

impl From<&Envelope> for WireMessage {
    fn from(envelope: &Envelope) -> Self {
        match envelope {
            Envelope::Request(request) => {
                let id = if request.id.is_empty() {
                    Uuid::new_v4().to_string()
                } else {
                    request.id.clone()
                };
                Self {
                    jsonrpc: Some(JSONRPC_VERSION.to_owned()),
                    id: Some(id),
                    method: Some(request.method.clone()),
                    params: Some(request.params.clone()),
                    ..Self::default()
                }
            }
            Envelope::Response(response) => Self {
                jsonrpc: Some(JSONRPC_VERSION.to_owned()),
                id: Some(response.id.clone()),
                result: response.result.clone(),
                error: response.error.clone(),
                ..Self::default()
            },
            Envelope::Notification(notification) => Self {
                method: Some(notification.method.clone()),
                params: Some(notification.params.clone()),
                ..Self::default()
            },
        }
    }
}

impl TryFrom<WireMessage> for Envelope {
    type Error = CodecError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        if let Some(version) = &wire.jsonrpc {
            if version != JSONRPC_VERSION {
                return Err(CodecError::UnsupportedVersion(version.clone()));
            }
        }

        let params = wire.params.unwrap_or(Value::Null);
        match (wire.id, wire.method) {
            (Some(id), Some(method)) if wire.result.is_none() && wire.error.is_none() => {
                Ok(Self::Request(Request { id, method, params }))
            }
            (Some(id), _) => Ok(Self::Response(Response {
                id,
                result: wire.result,
                error: wire.error,
            })),
            (None, Some(method)) => Ok(Self::Notification(Notification { method, params })),
            (None, None) => Err(CodecError::Unclassifiable),
        }
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(id)) => Ok(Some(id)),
        Some(Value::Number(id)) => Ok(Some(id.to_string())),
        Some(other) => Err(de::Error::custom(format!("invalid id: {other}"))),
    }
}
