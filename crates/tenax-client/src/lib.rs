//! Resilient client for the tenax RPC protocol.
//!
//! The client multiplexes calls over one pooled connection, retries
//! connection-level failures and per-call timeouts against a rotating set of
//! servers, and drains a connection's in-flight calls before releasing it.
//!
//! # Concurrency model
//!
//! Everything is single-threaded and cooperative: the client must be driven
//! from a current-thread tokio runtime inside a [`tokio::task::LocalSet`].
//! Each call runs as a local task; internal state is `Rc`/`Cell` based and
//! never locked.
//!
//! # Example
//!
//! ```no_run
//! use tenax_client::{Client, ClientOptions, RaisePolicy};
//! use serde_json::json;
//!
//! # async fn run() {
//! let options = ClientOptions::default().with_raise(RaisePolicy::Errback);
//! let client = Client::from_servers(vec!["127.0.0.1:1463".into()], options);
//!
//! let call = client.invoke("greeting", json!({"name": "someone"}));
//! call.on_success(|value| println!("got {value}"));
//! # }
//! ```
//!
//! # Failure reporting
//!
//! A call that exhausts its retry budget (or hits a non-retryable error) is
//! finalized according to [`RaisePolicy`]: silently degrade to a configured
//! default, fail the call's future, or report to the client's supervisory
//! error handler without resolving the future at all.

pub mod client;
pub mod connection;
pub mod future;
pub mod options;
pub mod pool;

mod dispatch;
mod manager;

pub use client::{Client, ClientStats};
pub use connection::Connection;
pub use future::ResultFuture;
pub use options::{ClientOptions, RaisePolicy};
pub use pool::{RoundRobinPool, ServerPool};
