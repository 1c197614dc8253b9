//! Transport module - opening the byte stream the client runs over.
//!
//! Provides connectors for:
//! - TCP
//! - Unix Domain Sockets (Linux/macOS)

mod connect;

#[cfg(unix)]
pub use connect::connect_unix;
pub use connect::connect_tcp;
