//! Protocol module - wire format, framing, and message types.
//!
//! This module implements the framing shared by both directions:
//! - Base-128 varint length prefix
//! - Frame buffer for accumulating partial reads
//! - Request/Response messages carried in frame payloads

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, Kind, Request, Response};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    decode_varint, encode_varint, varint_len, DEFAULT_MAX_FRAME_SIZE, MAX_VARINT_LEN,
};
