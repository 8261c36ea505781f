use crate::rpc::codec::CodecError;

/// Errors surfaced by the client facade itself.
///
/// Remote failures never show up here: they travel inside a
/// [`Reply`](crate::rpc::envelope::Reply).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("client has been closed")]
    Closed,

    #[error("client is not running")]
    NotRunning,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid endpoint `{0}`, expected tcp://host:port or ipc:///path")]
    InvalidEndpoint(String),

    #[error("method name `{0}` is reserved for protocol use")]
    ReservedMethod(String),

    #[error("outbound funnel is closed")]
    FunnelClosed,

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("failed to build session runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}
