//! TCP and Unix socket connectors.
//!
//! The client itself works over any ordered, reliable byte stream. These
//! helpers only open the usual ones:
//! - TCP (all platforms)
//! - Unix Domain Sockets (Linux/macOS)

use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::Result;

/// Connect to a TCP address with Nagle disabled.
///
/// Frames are small and latency sensitive, so each write should go out
/// immediately.
pub async fn connect_tcp<A: ToSocketAddrs>(addr: A) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Connect to a Unix socket path.
#[cfg(unix)]
pub async fn connect_unix<P: AsRef<std::path::Path>>(path: P) -> Result<tokio::net::UnixStream> {
    Ok(tokio::net::UnixStream::connect(path).await?)
}
