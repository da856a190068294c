//! Tenax Common Types and Transport
//!
//! This crate provides the protocol definitions and TCP transport layer for
//! the tenax RPC system. It is shared between the resilient client
//! (`tenax-client`) and anything that serves the protocol.
//!
//! # Architecture
//!
//! The wire protocol is deliberately simple:
//! - **Transport**: TCP, one persistent duplex connection per server
//! - **Serialization**: JSON
//! - **Message Format**: `[4-byte length prefix as u32 big-endian] + [JSON data]`
//! - **Correlation**: every request carries a unique id which the server
//!   echoes back, so any number of calls can be in flight on one connection
//!   and responses may arrive out of submission order
//!
//! # Components
//!
//! - [`protocol`] - Core protocol types (Request, Response, RpcError)
//! - [`transport`] - Framing, the multiplexed client connection, and a small
//!   pipelined server
//!
//! # Example
//!
//! ```no_run
//! use tenax_common::{Request, Response};
//! use serde_json::json;
//!
//! let request = Request::new("greeting", json!({"name": "someone"}));
//! let response = Response::success(request.id, json!("hello there someone!"));
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
