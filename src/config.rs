//! Client configuration.

use crate::codec::PayloadFormat;
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;

/// Default capacity of the push channel.
pub const DEFAULT_PUSH_CAPACITY: usize = 2 << 10;

/// Default capacity of the completion channel `go` allocates when the caller
/// does not supply one.
pub const DEFAULT_DONE_CAPACITY: usize = 10;

/// Default size of the scratch buffer for raw reads.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Capacity of the push channel. Pushes arriving while it is full are
    /// dropped.
    /// Default: 2048
    pub push_capacity: usize,
    /// Capacity of the completion channel allocated by `go` when none is
    /// given.
    /// Default: 10
    pub done_capacity: usize,
    /// Size of the scratch buffer used for each raw read.
    /// Default: 8 KiB
    pub read_buffer_size: usize,
    /// Largest payload accepted in either direction.
    /// Default: 16 MiB
    pub max_frame_size: usize,
    /// Payload encoding.
    /// Default: MsgPack
    pub payload_format: PayloadFormat,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            push_capacity: DEFAULT_PUSH_CAPACITY,
            done_capacity: DEFAULT_DONE_CAPACITY,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            payload_format: PayloadFormat::default(),
        }
    }
}
