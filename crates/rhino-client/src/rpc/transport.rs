//! Transport endpoints.
//!
//! The session loop is the only owner of the byte stream returned here;
//! nothing else reads from or writes to it.

use std::fmt;
use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::ClientError;

/// Byte stream carrying frames to and from the peer.
pub trait SessionStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> SessionStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type BoxStream = Box<dyn SessionStream>;

/// Address of the peer, written `tcp://host:port` or `ipc:///path/to.sock`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(String),
    #[cfg(unix)]
    Ipc(std::path::PathBuf),
}

impl Endpoint {
    /// Open a fresh stream to the endpoint.
    pub async fn dial(&self) -> std::io::Result<BoxStream> {
        match self {
            Self::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str()).await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            Self::Ipc(path) => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                Ok(Box::new(stream))
            }
        }
    }
}

impl FromStr for Endpoint {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(addr) = s.strip_prefix("tcp://") {
            let valid = addr
                .rsplit_once(':')
                .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
            if valid {
                return Ok(Self::Tcp(addr.to_owned()));
            }
        }

        if let Some(endpoint) = parse_ipc(s) {
            return Ok(endpoint);
        }

        Err(ClientError::InvalidEndpoint(s.to_owned()))
    }
}

#[cfg(unix)]
fn parse_ipc(s: &str) -> Option<Endpoint> {
    let path = s.strip_prefix("ipc://")?;
    (!path.is_empty()).then(|| Endpoint::Ipc(path.into()))
}

#[cfg(not(unix))]
fn parse_ipc(_s: &str) -> Option<Endpoint> {
    None
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            #[cfg(unix)]
            Self::Ipc(path) => write!(f, "ipc://{}", path.display()),
        }
    }
}

/// Where the session gets its stream from.
pub(crate) enum SessionSource {
    /// dialed on start and re-dialed after a loss
    Endpoint(Endpoint),
    /// handed in already connected; used once
    Stream(Option<BoxStream>),
}

impl SessionSource {
    pub(crate) fn is_dialable(&self) -> bool {
        matches!(self, Self::Endpoint(_))
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Endpoint(endpoint) => endpoint.to_string(),
            Self::Stream(_) => "<pre-connected stream>".to_owned(),
        }
    }
}
