//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management. Raw reads are
//! appended as they arrive; complete frames are split off the front. Bytes of
//! a frame that is not yet complete stay in the buffer across any number of
//! reads, whatever the chunk boundaries (including inside the length prefix).
//!
//! # Example
//!
//! ```
//! use cluster_rpc::protocol::{build_frame, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//! let frame = build_frame(b"hi");
//!
//! // Data arrives in chunks from the socket
//! assert!(buffer.push(&frame[..1]).unwrap().is_empty());
//! let payloads = buffer.push(&frame[1..]).unwrap();
//! assert_eq!(&payloads[0][..], b"hi");
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{decode_varint, DEFAULT_MAX_FRAME_SIZE};
use crate::error::{RpcError, Result};

/// Initial receive buffer capacity.
const INITIAL_CAPACITY: usize = 8 * 1024;

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Maximum allowed payload size.
    max_frame_size: usize,
}

impl FrameBuffer {
    /// Create a new frame buffer with the default payload limit.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom payload limit.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            max_frame_size,
        }
    }

    /// Append raw bytes without extracting frames.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Split the next complete frame payload off the front of the buffer.
    ///
    /// # Errors
    ///
    /// - [`RpcError::EmptyBuffer`] if nothing is buffered.
    /// - [`RpcError::TruncatedBuffer`] if the length prefix or payload is
    ///   still incomplete. Nothing is consumed; push more bytes and retry.
    /// - [`RpcError::FrameTooLarge`] or [`RpcError::Protocol`] if the prefix
    ///   is unacceptable. The stream cannot be resynchronized after this.
    pub fn next_frame(&mut self) -> Result<Bytes> {
        if self.buffer.is_empty() {
            return Err(RpcError::EmptyBuffer);
        }

        let (length, offset) = match decode_varint(&self.buffer)? {
            Some(prefix) => prefix,
            None => return Err(RpcError::TruncatedBuffer),
        };

        if length > self.max_frame_size {
            return Err(RpcError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }

        if self.buffer.len() - offset < length {
            return Err(RpcError::TruncatedBuffer);
        }

        let _ = self.buffer.split_to(offset);
        Ok(self.buffer.split_to(length).freeze())
    }

    /// Push data into the buffer and extract all complete frame payloads.
    ///
    /// Partial data is kept for the next push.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.extend(data);

        let mut frames = Vec::new();
        loop {
            match self.next_frame() {
                Ok(frame) => frames.push(frame),
                Err(e) if e.is_incomplete() => return Ok(frames),
                Err(e) => return Err(e),
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
