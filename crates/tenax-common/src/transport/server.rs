use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::protocol::error::{Result, RpcError};
use crate::protocol::{Request, Response};
use crate::transport::codec::JsonCodec;
use crate::transport::tcp;

/// Async TCP server for the tenax protocol.
///
/// Connections are pipelined: the read loop spawns one task per request and
/// responses are serialized through a writer channel, so a slow method never
/// blocks a fast one issued after it on the same connection. This is what
/// allows a client to observe completions out of submission order.
pub struct RpcServer {
    listener: TcpListener,
}

impl RpcServer {
    /// Creates a server bound to `bind_addr` (e.g. `"127.0.0.1:0"`).
    pub async fn new(bind_addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| RpcError::Connection(format!("failed to bind to {bind_addr}: {e}")))?;
        Ok(Self { listener })
    }

    /// Gets the actual bound address.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| RpcError::Connection(format!("failed to get local addr: {e}")))
    }

    /// Accepts connections forever, handling each request with `handler`.
    pub async fn run_with_handler<F, Fut>(&self, handler: F) -> Result<()>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Response>> + Send + 'static,
    {
        let handler = Arc::new(handler);

        loop {
            let (stream, peer_addr) = self
                .listener
                .accept()
                .await
                .map_err(|e| RpcError::Connection(format!("failed to accept connection: {e}")))?;
            debug!(%peer_addr, "connection established");

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, handler).await {
                    warn!(%peer_addr, error = %e, "connection error");
                }
            });
        }
    }
}

/// Serves one connection until the peer closes it.
async fn handle_connection<F, Fut>(stream: TcpStream, handler: Arc<F>) -> Result<()>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Response>> + Send + 'static,
{
    let _ = stream.set_nodelay(true);
    let (mut rd, mut wr) = stream.into_split();
    let (resp_tx, mut resp_rx) = tokio::sync::mpsc::unbounded_channel::<Response>();

    // Single writer; per-request tasks funnel their responses through it.
    let writer = tokio::spawn(async move {
        while let Some(response) = resp_rx.recv().await {
            let frame = JsonCodec::encode_response(&response)?;
            tcp::send_message(&mut wr, &frame).await?;
        }
        Ok::<(), RpcError>(())
    });

    loop {
        let data = match tcp::receive_message(&mut rd).await {
            Ok(data) => data,
            // Peer hung up; normal end of a connection.
            Err(_) => break,
        };
        let request = JsonCodec::decode_request(&data)?;

        let handler = Arc::clone(&handler);
        let resp_tx = resp_tx.clone();
        tokio::spawn(async move {
            let id = request.id;
            let response = match handler(request).await {
                Ok(response) => response,
                Err(e) => Response::error(id, e.to_string()),
            };
            let _ = resp_tx.send(response);
        });
    }

    drop(resp_tx);
    let _ = writer.await;
    Ok(())
}
