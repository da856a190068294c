//! Greeter demo.
//!
//! Starts a greeter RPC server on a random loopback port, then drives a
//! resilient client through a successful call, a call that times out and
//! retries until the budget runs out, and an explicit disconnect.
//!
//! Run with `cargo run -p tenax-greeter-demo` (set `RUST_LOG=debug` to watch
//! the connection lifecycle).

use std::time::Duration;

use serde_json::json;
use tenax_client::{Client, ClientOptions, RaisePolicy};
use tenax_common::transport::RpcServer;
use tenax_common::{Request, Response, Result};
use tokio::task::LocalSet;
use tracing::info;

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

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let server = RpcServer::new("127.0.0.1:0").await?;
    let addr = server.local_addr()?.to_string();
    info!(%addr, "greeter server listening");
    tokio::spawn(async move {
        let _ = server.run_with_handler(handle_request).await;
    });

    let local = LocalSet::new();
    local
        .run_until(async move {
            let options = ClientOptions::default()
                .with_timeout(Duration::from_secs(1))
                .with_timeout_override("delayed_greeting", Duration::from_millis(200))
                .with_retries(2)
                .with_raise(RaisePolicy::Errback);
            let client = Client::from_servers(vec![addr], options);
            client.on_connect(|| info!("connected"));

            let value = client.invoke("greeting", json!({"name": "someone"})).await;
            info!(?value, "greeting finished");

            // Slower than its deadline: retries twice, then fails.
            let value = client
                .invoke("delayed_greeting", json!({"name": "someone", "delay_ms": 800}))
                .await;
            info!(?value, stats = ?client.stats(), "delayed_greeting finished");

            client.disconnect();
            info!(stats = ?client.stats(), "disconnected");
        })
        .await;

    Ok(())
}
