//! Multiplexed client connection.
//!
//! One locally spawned task owns the socket. Callers submit requests over a
//! channel and get the matching response back through a oneshot; replies are
//! correlated by request id, so any number of calls can be in flight at once
//! and may complete out of submission order.
//!
//! Opening is lazy: [`RpcConn::open`] returns a handle immediately while the
//! task establishes the TCP connection in the background. Calls issued in
//! the meantime are queued and either flushed once the connect succeeds or
//! failed with the connect error. This mirrors how the cooperative event
//! loop serializes everything on one thread: there is never a moment where
//! two callers race to create "the" connection.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::protocol::error::{Result, RpcError};
use crate::protocol::{Request, RequestId, RpcArgs, RpcResult};
use crate::transport::codec::JsonCodec;
use crate::transport::tcp;

/// One-shot hook fired after the TCP connect succeeds.
pub type ConnectedHook = Box<dyn FnOnce()>;

type ReplySender = oneshot::Sender<Result<RpcResult>>;
type PendingMap = Rc<RefCell<HashMap<RequestId, ReplySender>>>;

enum Outbound {
    Call(Request, ReplySender),
    Shutdown,
}

/// Handle to a multiplexed connection to one server.
///
/// Must be created inside a [`tokio::task::LocalSet`]; the connection task
/// is spawned with `spawn_local` and shares no state across threads.
pub struct RpcConn {
    tx: mpsc::UnboundedSender<Outbound>,
    errored: Rc<Cell<bool>>,
    peer: String,
}

impl RpcConn {
    /// Opens a connection to `host:port`. Returns immediately; the connect
    /// itself runs on the connection task with `connect_timeout` applied.
    /// `connected_hook`, if given, runs once right after the socket is up.
    pub fn open(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        connected_hook: Option<ConnectedHook>,
    ) -> Self {
        let peer = format!("{host}:{port}");
        let (tx, rx) = mpsc::unbounded_channel();
        let errored = Rc::new(Cell::new(false));
        tokio::task::spawn_local(run_conn(
            host.to_string(),
            port,
            connect_timeout,
            rx,
            Rc::clone(&errored),
            peer.clone(),
            connected_hook,
        ));
        RpcConn { tx, errored, peer }
    }

    /// Issues `method` on this connection and waits for the matching reply.
    ///
    /// Fails with a connection error if the connection is already closed or
    /// dies while the call is outstanding. Deadlines are the caller's
    /// business; an abandoned caller simply drops the reply receiver.
    pub async fn call(&self, method: &str, args: RpcArgs) -> Result<RpcResult> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = Request::new(method, args);
        self.tx
            .send(Outbound::Call(request, reply_tx))
            .map_err(|_| RpcError::Connection(format!("connection to {} is closed", self.peer)))?;
        reply_rx
            .await
            .map_err(|_| RpcError::Connection(format!("connection to {} was lost", self.peer)))?
    }

    /// True once the underlying transport has entered a broken state.
    pub fn is_errored(&self) -> bool {
        self.errored.get() || self.tx.is_closed()
    }

    /// Asks the connection task to shut the socket down. Idempotent from the
    /// handle's point of view; the task releases the socket once.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Shutdown);
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

async fn run_conn(
    host: String,
    port: u16,
    connect_timeout: Duration,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    errored: Rc<Cell<bool>>,
    peer: String,
    connected_hook: Option<ConnectedHook>,
) {
    let stream = match tcp::connect(&host, port, connect_timeout).await {
        Ok(stream) => stream,
        Err(error) => {
            debug!(%peer, %error, "connect failed");
            errored.set(true);
            // Fail everything that queued up while we were connecting.
            rx.close();
            while let Some(outbound) = rx.recv().await {
                if let Outbound::Call(_, reply) = outbound {
                    let _ = reply.send(Err(connect_failure(&error, &peer)));
                }
            }
            return;
        }
    };
    debug!(%peer, "connected");
    if let Some(hook) = connected_hook {
        hook();
    }

    let (rd, mut wr) = stream.into_split();
    let pending: PendingMap = Rc::new(RefCell::new(HashMap::new()));
    let (close_tx, close_rx) = oneshot::channel();
    let reader = tokio::task::spawn_local(read_loop(
        rd,
        Rc::clone(&pending),
        Rc::clone(&errored),
        close_rx,
        peer.clone(),
    ));

    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Call(request, reply) => {
                let frame = match JsonCodec::encode_request(&request) {
                    Ok(frame) => frame,
                    Err(error) => {
                        let _ = reply.send(Err(error));
                        continue;
                    }
                };
                // Register before writing so a reply arriving mid-write
                // still finds its caller.
                pending.borrow_mut().insert(request.id, reply);
                if let Err(error) = tcp::send_message(&mut wr, &frame).await {
                    debug!(%peer, %error, "write failed");
                    errored.set(true);
                    fail_pending(&pending, &format!("connection to {peer} lost: {error}"));
                    break;
                }
            }
            Outbound::Shutdown => {
                debug!(%peer, "closing connection");
                break;
            }
        }
    }

    // Stop the reader, send FIN, and reap the task before letting go of the
    // socket. This is the single point where the resource is released.
    let _ = close_tx.send(());
    let _ = tokio::io::AsyncWriteExt::shutdown(&mut wr).await;
    let _ = reader.await;

    // Calls that raced in around the close get an answer instead of hanging.
    rx.close();
    while let Some(outbound) = rx.recv().await {
        if let Outbound::Call(_, reply) = outbound {
            let _ = reply.send(Err(RpcError::Connection(format!(
                "connection to {peer} is closed"
            ))));
        }
    }
}

async fn read_loop(
    mut rd: OwnedReadHalf,
    pending: PendingMap,
    errored: Rc<Cell<bool>>,
    mut close_rx: oneshot::Receiver<()>,
    peer: String,
) {
    loop {
        tokio::select! {
            _ = &mut close_rx => return,
            frame = tcp::receive_message(&mut rd) => {
                let decoded = frame.and_then(|data| JsonCodec::decode_response(&data));
                match decoded {
                    Ok(response) => {
                        // The caller may have given up on this id already
                        // (its deadline fired); dropping the reply is fine.
                        if let Some(reply) = pending.borrow_mut().remove(&response.id) {
                            let outcome = if response.success {
                                Ok(response.result.unwrap_or(Value::Null))
                            } else {
                                Err(RpcError::Application(
                                    response
                                        .error
                                        .unwrap_or_else(|| "unspecified remote error".to_string()),
                                ))
                            };
                            let _ = reply.send(outcome);
                        }
                    }
                    Err(error) => {
                        debug!(%peer, %error, "read failed");
                        errored.set(true);
                        fail_pending(&pending, &format!("connection to {peer} lost: {error}"));
                        return;
                    }
                }
            }
        }
    }
}

fn fail_pending(pending: &PendingMap, reason: &str) {
    for (_, reply) in pending.borrow_mut().drain() {
        let _ = reply.send(Err(RpcError::Connection(reason.to_string())));
    }
}

/// Re-materializes the connect error for each queued caller. Timeouts stay
/// timeouts so classification treats a slow connect like any other expired
/// deadline.
fn connect_failure(error: &RpcError, peer: &str) -> RpcError {
    match error {
        RpcError::Timeout(ms) => RpcError::Timeout(*ms),
        other => RpcError::Connection(format!("connect to {peer} failed: {other}")),
    }
}
