use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use std::io::{Cursor, Read as _, Write as _};

use super::envelope::{Envelope, WireMessage};

/// Frame header: payload length (4 bytes, big-endian) then a compression flag.
const HEADER_LEN: usize = 4;

/// Encodes envelopes as length-prefixed MessagePack frames.
///
/// ```text
/// +----------------+-----------+----------------------------+
/// | len: u32 (BE)  | flag: u8  | msgpack map (gzip if flag) |
/// +----------------+-----------+----------------------------+
///                  |<------------------ len --------------->|
/// ```
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    const COMPRESSION_THRESHOLD: usize = 1024;

    /// Largest frame accepted from the peer.
    pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

    const FLAG_PLAIN: u8 = 0;
    const FLAG_GZIP: u8 = 1;

    /// Encode an envelope into one complete wire frame.
    ///
    /// Requests and responses are tagged with the protocol version, and a
    /// request with an empty id gets a generated one.
    pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        let payload = rmp_serde::to_vec_named(&WireMessage::from(envelope))
            .map_err(|e| CodecError::SerializationError(e.to_string()))?;

        // check if compression is needed
        let (flag, data) = if payload.len() > Self::COMPRESSION_THRESHOLD {
            (Self::FLAG_GZIP, Self::compress(&payload)?)
        } else {
            (Self::FLAG_PLAIN, payload)
        };

        let body_len = data.len() + 1;
        if body_len > Self::MAX_FRAME_LEN {
            return Err(CodecError::FrameTooLarge(body_len));
        }

        let mut frame = Vec::with_capacity(HEADER_LEN + body_len);
        frame.extend_from_slice(&(body_len as u32).to_be_bytes());
        frame.push(flag);
        frame.extend_from_slice(&data);
        Ok(frame)
    }

    /// Decode exactly one complete frame.
    pub fn decode(frame: &[u8]) -> Result<Envelope, CodecError> {
        let Some(body_len) = Self::frame_len(frame) else {
            return Err(CodecError::InvalidFrame);
        };
        if body_len == 0 || frame.len() != HEADER_LEN + body_len {
            return Err(CodecError::InvalidFrame);
        }

        let payload = match frame[HEADER_LEN] {
            Self::FLAG_PLAIN => frame[HEADER_LEN + 1..].to_vec(),
            Self::FLAG_GZIP => Self::decompress(&frame[HEADER_LEN + 1..])?,
            other => return Err(CodecError::UnknownCompression(other)),
        };

        let wire: WireMessage = rmp_serde::from_slice(&payload)
            .map_err(|e| CodecError::DeserializationError(e.to_string()))?;
        Envelope::try_from(wire)
    }

    /// Declared body length of the frame at the start of `buffer`, if the
    /// header is complete.
    fn frame_len(buffer: &[u8]) -> Option<usize> {
        let header: [u8; HEADER_LEN] = buffer.get(..HEADER_LEN)?.try_into().ok()?;
        Some(u32::from_be_bytes(header) as usize)
    }

    /// compress data
    fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(data)
            .map_err(|e| CodecError::CompressionError(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| CodecError::CompressionError(e.to_string()))
    }

    /// decompress data
    fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut decoder = GzDecoder::new(Cursor::new(data));
        let mut result = Vec::new();
        decoder
            .read_to_end(&mut result)
            .map_err(|e| CodecError::CompressionError(e.to_string()))?;
        Ok(result)
    }
}

/// Error types for envelope codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Compression error: {0}")]
    CompressionError(String),

    #[error("Unknown compression flag {0}")]
    UnknownCompression(u8),

    #[error("Frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),

    #[error("Unsupported jsonrpc version {0:?}")]
    UnsupportedVersion(String),

    #[error("Message has neither an id nor a method")]
    Unclassifiable,

    #[error("Invalid frame format")]
    InvalidFrame,
}

/// Frame buffer for reassembling frames split across reads
pub struct FrameBuffer {
    buffer: Vec<u8>,
}

impl FrameBuffer {
    /// Create a new `FrameBuffer`
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Add data to the buffer
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Take the next complete frame out of the buffer.
    ///
    /// Returns `Ok(None)` while the frame is still incomplete. A frame that
    /// declares an oversized length cannot be skipped reliably, so the whole
    /// buffer is discarded and an error returned.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, CodecError> {
        let Some(body_len) = EnvelopeCodec::frame_len(&self.buffer) else {
            return Ok(None);
        };

        if body_len > EnvelopeCodec::MAX_FRAME_LEN {
            self.buffer.clear();
            return Err(CodecError::FrameTooLarge(body_len));
        }

        let frame_len = HEADER_LEN + body_len;
        if self.buffer.len() < frame_len {
            return Ok(None);
        }

        Ok(Some(self.buffer.drain(..frame_len).collect()))
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
