//! MsgPack codec using `rmp-serde`.
//!
//! Always encodes with `to_vec_named`, so structs become maps keyed by field
//! name. The payload stays self-describing and tolerant of field reordering.
//!
//! # Example
//!
//! ```
//! use cluster_rpc::codec::MsgPackCodec;
//! use cluster_rpc::protocol::Response;
//!
//! let response = Response::ok(1, &b"pong"[..]);
//! let encoded = MsgPackCodec::encode(&response).unwrap();
//! let decoded: Response = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, response);
//! ```

use crate::error::Result;

/// MessagePack codec for frame payloads.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
