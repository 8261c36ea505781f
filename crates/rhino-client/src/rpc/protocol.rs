use serde::{Deserialize, Serialize};

/// JSON-RPC version tag carried by every outbound envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Keepalive method; echoed by the peer and never dispatched to handlers.
pub const HEARTBEAT_METHOD: &str = "x.heartbeat";

/// Identity announcement sent right after the transport connects.
pub const HELLO_METHOD: &str = "rpc.hello";

/// Prefix reserved for protocol-internal methods.
pub const RESERVED_PREFIX: &str = "rpc.";

/// Wire protocol revision announced in [`HelloMessage`].
pub const PROTOCOL_VERSION: u16 = 1;

/// Error code of the reply returned when a call times out locally.
pub const TIMEOUT_CODE: i64 = -1;

/// Message of the reply returned when a call times out locally.
pub const TIMEOUT_MESSAGE: &str = "jsonrpc, timeout";

/// JSON-RPC "invalid request" code, used for locally rejected calls.
pub const INVALID_REQUEST_CODE: i64 = -32600;

/// JSON-RPC "internal error" code, used when a request cannot be encoded.
pub const INTERNAL_ERROR_CODE: i64 = -32603;

/// Whether `method` lives in the protocol-reserved namespace.
pub fn is_reserved(method: &str) -> bool {
    method.starts_with(RESERVED_PREFIX)
}

/// Handshake payload naming this endpoint to the peer
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HelloMessage {
    /// routing key of this client on the peer side
    pub identity: String,

    pub version: u16,
}

impl HelloMessage {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            version: PROTOCOL_VERSION,
        }
    }
}

/// Heartbeat payload
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct HeartbeatParams {
    /// unix epoch seconds, with sub-second precision
    pub time: f64,
}

impl HeartbeatParams {
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self {
            time: now.timestamp_millis() as f64 / 1000.0,
        }
    }
}
