//! Tenax Transport Layer
//!
//! Framing and connection handling for the tenax wire protocol.
//!
//! # Wire Format
//!
//! `[4-byte length prefix as u32 big-endian] + [JSON data]`, with a 16 MB
//! frame cap to bound allocations.
//!
//! # Components
//!
//! - **[`JsonCodec`]**: Encode/decode protocol messages to JSON
//! - **[`RpcConn`]**: Multiplexed client connection; many calls in flight on
//!   one socket, replies matched by request id
//! - **[`RpcServer`]**: Pipelined TCP server; a slow method does not block
//!   later requests on the same connection

pub mod codec;
pub mod conn;
pub mod server;
pub mod tcp;

pub use codec::JsonCodec;
pub use conn::{ConnectedHook, RpcConn};
pub use server::RpcServer;
