//! RPC module
//!
//! Wire envelope, framing codec, protocol constants, transport dialing and
//! the threaded session client built on top of them.
pub mod client;
pub mod codec;
pub mod envelope;
pub mod protocol;
pub mod transport;

pub use codec::{CodecError, EnvelopeCodec, FrameBuffer};
pub use envelope::{Envelope, Notification, Reply, Request, Response, RpcError};
pub use protocol::*;
