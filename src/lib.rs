//! # cluster-rpc
//!
//! Client half of the lightweight RPC protocol servers in a session cluster
//! use to call each other (frontend to backend calls, backend to frontend
//! pushes).
//!
//! ## Protocol
//!
//! - **Framing**: `varint(len(payload)) ++ payload`, base-128, least
//!   significant group first
//! - **Payload**: self-describing MessagePack (or JSON) encoding of a
//!   request or response
//! - **Multiplexing**: requests carry a per-connection sequence number;
//!   responses may come back in any order and are matched by it
//!
//! ## Example
//!
//! ```ignore
//! use cluster_rpc::{Client, Kind};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Client::dial("127.0.0.1:3250").await.unwrap();
//!
//!     let reply = client
//!         .call(Kind::Call, "Room", "Join", 7, &b"{\"room\":1}"[..])
//!         .await
//!         .unwrap();
//!
//!     client.close().await.unwrap();
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;

mod call;
mod client;
mod pending;
mod writer;

pub use call::{done_channel, Call, CallHandle, Done};
pub use client::{Client, ClientBuilder, ShutdownCallback};
pub use config::ClientConfig;
pub use error::{Result, RpcError};
pub use protocol::{Kind, Request, Response};
