//! Request writer: encodes requests into frames and writes them out.
//!
//! The client keeps one [`FrameWriter`] behind an async mutex
//! (`Mutex<FrameWriter>`), the write-serialization lock. Holding it for the
//! whole encode+write sequence guarantees frames from concurrent callers never
//! interleave on the wire.
//!
//! # Architecture
//!
//! ```text
//! Caller 1 ─┐
//! Caller 2 ─┼─► Mutex<FrameWriter> ─► varint prefix + payload ─► Stream
//! Caller N ─┘
//! ```

use std::pin::Pin;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::codec::PayloadFormat;
use crate::error::{RpcError, Result};
use crate::protocol::{encode_varint, varint_len, Request};

/// Type-erased write half of the connection.
pub(crate) type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Writes length-prefixed request frames to the stream.
pub(crate) struct FrameWriter {
    writer: BoxedWriter,
    format: PayloadFormat,
    max_frame_size: usize,
    /// Reused frame buffer.
    scratch: BytesMut,
}

impl FrameWriter {
    pub(crate) fn new(writer: BoxedWriter, format: PayloadFormat, max_frame_size: usize) -> Self {
        Self {
            writer,
            format,
            max_frame_size,
            scratch: BytesMut::new(),
        }
    }

    /// Encode `request` and write it as one frame.
    ///
    /// Prefix and payload go out in a single `write_all`, followed by a
    /// flush. Nothing is written if encoding fails or the payload is over
    /// the size limit.
    pub(crate) async fn write_request(&mut self, request: &Request) -> Result<()> {
        let payload = self.format.encode(request)?;

        if payload.len() > self.max_frame_size {
            return Err(RpcError::RequestTooLong {
                size: payload.len(),
                max: self.max_frame_size,
            });
        }

        self.scratch.clear();
        self.scratch.reserve(varint_len(payload.len()) + payload.len());
        encode_varint(payload.len(), &mut self.scratch);
        self.scratch.extend_from_slice(&payload);

        self.writer.write_all(&self.scratch).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Shut down the write side so the peer observes end of stream.
    pub(crate) async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
