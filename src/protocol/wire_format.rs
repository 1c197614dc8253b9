//! Wire format: base-128 varint length prefix.
//!
//! Every frame on the wire is
//! ```text
//! ┌────────────────────────┬──────────────────────┐
//! │ varint(len(payload))   │ payload              │
//! │ 1..=10 bytes           │ len(payload) bytes   │
//! └────────────────────────┴──────────────────────┘
//! ```
//!
//! The varint carries 7 bits per byte, least significant group first. The high
//! bit of a byte is set when more bytes follow and clear on the final byte.

use bytes::BufMut;

use crate::error::{RpcError, Result};

/// Maximum encoded length of a varint holding a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Default maximum payload size accepted in either direction (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Continuation bit of a varint byte.
const CONTINUATION: u8 = 0x80;

/// Mask for the 7 value bits of a varint byte.
const VALUE_MASK: u8 = 0x7F;

/// Append the varint encoding of `value` to `buf`.
///
/// # Example
///
/// ```
/// use cluster_rpc::protocol::encode_varint;
///
/// let mut buf = Vec::new();
/// encode_varint(300, &mut buf);
/// assert_eq!(buf, [0xAC, 0x02]);
/// ```
pub fn encode_varint<B: BufMut>(value: usize, buf: &mut B) {
    let mut remaining = value as u64;
    loop {
        let group = (remaining & VALUE_MASK as u64) as u8;
        remaining >>= 7;
        if remaining != 0 {
            buf.put_u8(group | CONTINUATION);
        } else {
            buf.put_u8(group);
            break;
        }
    }
}

/// Number of bytes `encode_varint` emits for `value`.
pub fn varint_len(value: usize) -> usize {
    let mut remaining = value as u64;
    let mut len = 1;
    while remaining >= CONTINUATION as u64 {
        remaining >>= 7;
        len += 1;
    }
    len
}

/// Decode a varint from the start of `buf`.
///
/// Returns `Ok(Some((value, prefix_len)))` once a terminating byte is found,
/// `Ok(None)` if every available byte still has the continuation bit set,
/// and an error if the prefix cannot fit in a `u64`.
pub fn decode_varint(buf: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut value: u64 = 0;

    for (i, &byte) in buf.iter().enumerate() {
        if (i == MAX_VARINT_LEN - 1 && byte > 1) || i >= MAX_VARINT_LEN {
            return Err(RpcError::Protocol(
                "length prefix overflows 64 bits".to_string(),
            ));
        }

        value |= u64::from(byte & VALUE_MASK) << (7 * i);

        if byte & CONTINUATION == 0 {
            let value = usize::try_from(value).map_err(|_| {
                RpcError::Protocol(format!("length prefix {} does not fit in usize", value))
            })?;
            return Ok(Some((value, i + 1)));
        }
    }

    Ok(None)
}
