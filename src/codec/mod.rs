//! Codec module - payload serialization and the response decoder.
//!
//! This module provides codecs for encoding/decoding frame payloads:
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (default)
//! - [`JsonCodec`] - JSON using `serde_json`
//!
//! [`PayloadFormat`] selects one of them at runtime, and
//! [`ResponseDecoder`] combines a [`FrameBuffer`] with a format to turn raw
//! socket reads into [`Response`] values.
//!
//! # Example
//!
//! ```
//! use cluster_rpc::codec::{PayloadFormat, ResponseDecoder};
//! use cluster_rpc::protocol::{build_frame, Response};
//!
//! let format = PayloadFormat::MsgPack;
//! let payload = format.encode(&Response::ok(1, &b"pong"[..])).unwrap();
//!
//! let mut decoder = ResponseDecoder::new(format);
//! decoder.extend(&build_frame(&payload));
//! let response = decoder.read_response().unwrap();
//! assert_eq!(&response.data[..], b"pong");
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{RpcError, Result};
use crate::protocol::{FrameBuffer, Response, DEFAULT_MAX_FRAME_SIZE};

/// Payload encoding used inside frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    /// MessagePack with named fields.
    #[default]
    MsgPack,
    /// JSON.
    Json,
}

impl PayloadFormat {
    /// Encode a value with this format.
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            PayloadFormat::MsgPack => MsgPackCodec::encode(value),
            PayloadFormat::Json => JsonCodec::encode(value),
        }
    }

    /// Decode a value with this format.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            PayloadFormat::MsgPack => MsgPackCodec::decode(bytes),
            PayloadFormat::Json => JsonCodec::decode(bytes),
        }
    }
}

/// Incremental response decoder owned by the reader loop.
pub struct ResponseDecoder {
    frames: FrameBuffer,
    format: PayloadFormat,
}

impl ResponseDecoder {
    /// Create a decoder with the default frame size limit.
    pub fn new(format: PayloadFormat) -> Self {
        Self::with_max_frame_size(format, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a decoder with a custom frame size limit.
    pub fn with_max_frame_size(format: PayloadFormat, max_frame_size: usize) -> Self {
        Self {
            frames: FrameBuffer::with_max_frame_size(max_frame_size),
            format,
        }
    }

    /// Append bytes from a raw read.
    pub fn extend(&mut self, data: &[u8]) {
        self.frames.extend(data);
    }

    /// Decode the next complete response.
    ///
    /// [`RpcError::EmptyBuffer`] and [`RpcError::TruncatedBuffer`] mean "read
    /// more and retry". A codec error means the frame was complete but its
    /// payload was not a valid response; that frame has been consumed and the
    /// next call continues with the following frame. Any other error is a
    /// framing violation the stream cannot recover from.
    pub fn read_response(&mut self) -> Result<Response> {
        let payload = self.frames.next_frame()?;
        self.format.decode(&payload)
    }

    /// Number of bytes waiting for a complete frame.
    pub fn buffered(&self) -> usize {
        self.frames.len()
    }
}

/// Whether an error from [`ResponseDecoder::read_response`] only affected a
/// single, already consumed frame.
pub(crate) fn is_payload_error(err: &RpcError) -> bool {
    matches!(err, RpcError::MsgPackDecode(_) | RpcError::Json(_))
}
