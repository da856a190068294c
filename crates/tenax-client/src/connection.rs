use std::cell::Cell;

use tenax_common::transport::RpcConn;
use tenax_common::{Result, RpcArgs, RpcResult};
use tracing::debug;

/// One transport connection bound to one server, plus the bookkeeping that
/// makes graceful draining possible: how many calls are currently dispatched
/// on it and whether its owner has asked it to close.
///
/// The underlying socket is released exactly once, either by [`close`] when
/// no call is in flight, or by the [`decr_request`] that brings the
/// in-flight count to zero after a close was requested. It is never released
/// while the count is above zero.
///
/// [`close`]: Connection::close
/// [`decr_request`]: Connection::decr_request
pub struct Connection {
    conn: RpcConn,
    pending_requests: Cell<u32>,
    shutting_down: Cell<bool>,
}

impl Connection {
    pub(crate) fn new(conn: RpcConn) -> Self {
        Connection {
            conn,
            pending_requests: Cell::new(0),
            shutting_down: Cell::new(false),
        }
    }

    /// Number of calls dispatched on this connection and not yet resolved.
    pub fn pending_requests(&self) -> u32 {
        self.pending_requests.get()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.get()
    }

    /// True once the underlying transport has entered a broken state.
    pub fn is_errored(&self) -> bool {
        self.conn.is_errored()
    }

    pub fn peer(&self) -> &str {
        self.conn.peer()
    }

    /// Marks one more call as in flight.
    pub(crate) fn incr_request(&self) {
        self.pending_requests.set(self.pending_requests.get() + 1);
    }

    /// Marks one in-flight call as finished. Each attempt pairs exactly one
    /// `decr_request` with its earlier `incr_request`, whatever the outcome.
    /// The last one out releases the socket if the connection was asked to
    /// close in the meantime.
    pub(crate) fn decr_request(&self) {
        let remaining = self.pending_requests.get().saturating_sub(1);
        self.pending_requests.set(remaining);
        if self.shutting_down.get() && remaining == 0 {
            debug!(peer = self.peer(), "drained, releasing connection");
            self.conn.close();
        }
    }

    /// Asks this connection to close. With calls still in flight the socket
    /// stays open until the last of them finishes; otherwise it is released
    /// immediately. A repeated close is a no-op.
    pub(crate) fn close(&self) {
        if self.shutting_down.replace(true) {
            return;
        }
        if self.pending_requests.get() == 0 {
            self.conn.close();
        }
    }

    pub(crate) async fn call(&self, method: &str, args: RpcArgs) -> Result<RpcResult> {
        self.conn.call(method, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;
    use std::time::Duration;

    use serde_json::json;
    use tenax_common::transport::RpcServer;
    use tenax_common::{Request, Response};
    use tokio::task::LocalSet;

    async fn start_echo_server() -> (String, u16) {
        let server = RpcServer::new("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server
                .run_with_handler(|request: Request| async move {
                    Ok(Response::success(request.id, request.args))
                })
                .await;
        });
        (addr.ip().to_string(), addr.port())
    }

    fn open(host: &str, port: u16) -> Connection {
        Connection::new(RpcConn::open(host, port, Duration::from_secs(5), None))
    }

    // After close() the socket release shows up as the connection task going
    // away, which is_errored() reports once the channel to it is closed.
    async fn released(conn: &Connection) -> bool {
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if conn.is_errored() {
                return true;
            }
        }
        false
    }

    #[tokio::test]
    async fn test_close_with_no_pending_releases_immediately() {
        let (host, port) = start_echo_server().await;
        let local = LocalSet::new();
        local
            .run_until(async {
                let conn = open(&host, port);
                conn.call("echo", json!(1)).await.unwrap();

                conn.close();
                assert!(conn.is_shutting_down());
                assert!(released(&conn).await);
            })
            .await;
    }

    #[tokio::test]
    async fn test_close_defers_release_until_drained() {
        let (host, port) = start_echo_server().await;
        let local = LocalSet::new();
        local
            .run_until(async {
                let conn = Rc::new(open(&host, port));
                conn.incr_request();
                conn.incr_request();

                conn.close();
                assert!(conn.is_shutting_down());
                // Two calls still in flight: no release yet.
                assert!(!released(&conn).await);

                conn.decr_request();
                assert!(!released(&conn).await);

                conn.decr_request();
                assert_eq!(conn.pending_requests(), 0);
                assert!(released(&conn).await);
            })
            .await;
    }

    #[tokio::test]
    async fn test_repeated_close_is_noop() {
        let (host, port) = start_echo_server().await;
        let local = LocalSet::new();
        local
            .run_until(async {
                let conn = open(&host, port);
                conn.incr_request();
                conn.close();
                conn.close();
                assert!(!released(&conn).await);
                conn.decr_request();
                assert!(released(&conn).await);
            })
            .await;
    }

    #[tokio::test]
    async fn test_incr_decr_pairing() {
        let (host, port) = start_echo_server().await;
        let local = LocalSet::new();
        local
            .run_until(async {
                let conn = open(&host, port);
                for _ in 0..5 {
                    conn.incr_request();
                }
                for _ in 0..5 {
                    conn.decr_request();
                }
                assert_eq!(conn.pending_requests(), 0);
                // Never asked to close: still alive.
                assert!(!released(&conn).await);
            })
            .await;
    }
}
