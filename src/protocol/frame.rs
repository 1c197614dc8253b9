//! Logical messages carried inside frames, and frame construction.
//!
//! A [`Request`] travels client to server, a [`Response`] server to client.
//! Both share the same length-prefixed envelope; only the payload differs.
//!
//! # Example
//!
//! ```
//! use cluster_rpc::protocol::{build_frame, FrameBuffer};
//!
//! let frame = build_frame(b"hello");
//! assert_eq!(frame[0], 5);
//!
//! let mut buffer = FrameBuffer::new();
//! let payloads = buffer.push(&frame).unwrap();
//! assert_eq!(&payloads[0][..], b"hello");
//! ```

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::wire_format::{encode_varint, varint_len};

/// Message kind shared by requests and responses.
///
/// Carried on the wire as its integer value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Kind {
    /// Ordinary request expecting a correlated reply.
    Call = 0,
    /// Fire-and-forget message; never correlated to a pending call.
    Push = 1,
    /// Reply correlated to a pending call by sequence number.
    Response = 2,
    /// Reply relayed to the application layer instead of a pending call.
    HandlerResponse = 3,
}

impl Kind {
    /// Whether an incoming message of this kind bypasses the pending table
    /// and goes to the push channel.
    #[inline]
    pub fn is_out_of_band(self) -> bool {
        matches!(self, Kind::Push | Kind::HandlerResponse)
    }
}

impl From<Kind> for u8 {
    fn from(kind: Kind) -> Self {
        kind as u8
    }
}

impl TryFrom<u8> for Kind {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Kind::Call),
            1 => Ok(Kind::Push),
            2 => Ok(Kind::Response),
            3 => Ok(Kind::HandlerResponse),
            other => Err(format!("unknown message kind {}", other)),
        }
    }
}

/// Outgoing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Request {
    /// Sequence number correlating the reply.
    pub seq: u64,
    /// Target in `"Service.Method"` form.
    pub service_method: String,
    /// Opaque argument bytes.
    #[serde(with = "byte_field")]
    pub args: Bytes,
    /// Message kind.
    pub kind: Kind,
    /// Originating frontend session, opaque to the client.
    pub sid: u64,
}

/// Incoming response or push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Response {
    /// Sequence number of the request this answers.
    pub seq: u64,
    /// Message kind.
    pub kind: Kind,
    /// Remote error string; empty on success.
    #[serde(default)]
    pub error: String,
    /// Reply bytes.
    #[serde(default, with = "byte_field")]
    pub data: Bytes,
}

impl Response {
    /// Successful reply to `seq`.
    pub fn ok(seq: u64, data: impl Into<Bytes>) -> Self {
        Self {
            seq,
            kind: Kind::Response,
            error: String::new(),
            data: data.into(),
        }
    }

    /// Error reply to `seq`.
    pub fn error(seq: u64, error: impl Into<String>) -> Self {
        Self {
            seq,
            kind: Kind::Response,
            error: error.into(),
            data: Bytes::new(),
        }
    }

    /// Server-originated push, not tied to any call.
    pub fn push(data: impl Into<Bytes>) -> Self {
        Self {
            seq: 0,
            kind: Kind::Push,
            error: String::new(),
            data: data.into(),
        }
    }

    /// Check if the remote reported an error.
    #[inline]
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Byte fields as MessagePack bin, or as base64 strings in JSON.
///
/// A JSON `null` decodes to empty bytes.
mod byte_field {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&STANDARD.encode(bytes))
        } else {
            serializer.serialize_bytes(bytes)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        if !deserializer.is_human_readable() {
            return Bytes::deserialize(deserializer);
        }
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => STANDARD
                .decode(text)
                .map(Bytes::from)
                .map_err(de::Error::custom),
            None => Ok(Bytes::new()),
        }
    }
}

/// Build a complete frame: varint length prefix followed by the payload.
///
/// The result is a single contiguous buffer so it can go out in one write.
pub fn build_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(varint_len(payload.len()) + payload.len());
    encode_varint(payload.len(), &mut buf);
    buf.extend_from_slice(payload);
    buf.freeze()
}
