//! Greeter test fixture.
//!
//! A tenax RPC server exposing `greeting` and `delayed_greeting`, started on
//! a random loopback port per test.

use std::time::Duration;

use serde_json::json;
use tenax_common::transport::RpcServer;
use tenax_common::{Request, Response, Result};

pub struct GreeterServer {
    addr: String,
    handle: tokio::task::JoinHandle<()>,
}

impl GreeterServer {
    pub async fn start() -> Self {
        let server = RpcServer::new("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let _ = server.run_with_handler(handle_request).await;
        });
        GreeterServer { addr, handle }
    }

    pub fn addr(&self) -> String {
        self.addr.clone()
    }
}

impl Drop for GreeterServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_request(request: Request) -> Result<Response> {
    let name = request.args["name"].as_str().unwrap_or("stranger").to_string();
    match request.method.as_str() {
        "greeting" => Ok(Response::success(
            request.id,
            json!(format!("hello there {name}!")),
        )),
        "delayed_greeting" => {
            let delay = request.args["delay_ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(Response::success(
                request.id,
                json!(format!("hello there {name}!")),
            ))
        }
        other => Ok(Response::error(request.id, format!("unknown method `{other}`"))),
    }
}

/// Reserves a loopback port with nothing listening on it.
pub async fn dead_addr() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();
}
