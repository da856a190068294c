use std::cell::RefCell;
use std::rc::Rc;

use tenax_common::transport::{ConnectedHook, RpcConn};
use tenax_common::{Result, RpcError};
use tracing::{debug, warn};

use crate::client::ClientStats;
use crate::connection::Connection;
use crate::options::ClientOptions;
use crate::pool::ServerPool;

/// Owns the connection currently serving new calls, replaces it when it
/// breaks or wears out, and keeps retired connections around until their
/// in-flight calls drain.
pub(crate) struct ConnectionManager {
    current: Option<Rc<Connection>>,
    pending_shutdown: Vec<Rc<Connection>>,
    /// Calls issued on the current connection, checked against
    /// `server_max_requests`.
    request_count: u32,
    /// Lifetime count of connection-level teardowns. Dispatch snapshots it
    /// per attempt to dedupe teardowns across calls sharing one broken
    /// connection.
    error_count: u64,
    /// One-shot hook waiting for the next successful connect. Kept here, not
    /// in the connection task, so a failed connect does not lose it: it fires
    /// on the connect that actually comes up.
    post_connect: Rc<RefCell<Option<ConnectedHook>>>,
    stats: ClientStats,
}

impl ConnectionManager {
    pub(crate) fn new() -> Self {
        ConnectionManager {
            current: None,
            pending_shutdown: Vec::new(),
            request_count: 0,
            error_count: 0,
            post_connect: Rc::new(RefCell::new(None)),
            stats: ClientStats::default(),
        }
    }

    pub(crate) fn error_count(&self) -> u64 {
        self.error_count
    }

    pub(crate) fn request_count(&self) -> u32 {
        self.request_count
    }

    pub(crate) fn note_request(&mut self) {
        self.request_count += 1;
    }

    pub(crate) fn stats(&self) -> ClientStats {
        self.stats
    }

    pub(crate) fn has_connection(&self) -> bool {
        self.current.is_some()
    }

    pub(crate) fn draining_connections(&self) -> usize {
        self.pending_shutdown.len()
    }

    pub(crate) fn set_post_connect(&mut self, hook: ConnectedHook) {
        *self.post_connect.borrow_mut() = Some(hook);
    }

    /// Wraps the pending post-connect hook for one connect attempt. The
    /// wrapper drains the slot when it fires, so only a connect that
    /// succeeds consumes the hook.
    fn connect_hook(&self) -> Option<ConnectedHook> {
        if self.post_connect.borrow().is_none() {
            return None;
        }
        let slot = Rc::clone(&self.post_connect);
        Some(Box::new(move || {
            if let Some(hook) = slot.borrow_mut().take() {
                hook();
            }
        }))
    }

    /// Returns the connection that will serve the next attempt, opening a
    /// new one if there is none or the current one has gone bad.
    ///
    /// Fails only when the pool is exhausted or an address is malformed;
    /// a connect that is refused or times out surfaces later, through the
    /// attempt's call on the returned connection.
    pub(crate) fn ensure_connection(
        &mut self,
        pool: &mut dyn ServerPool,
        options: &ClientOptions,
    ) -> Result<Rc<Connection>> {
        self.prune_drained();

        if let Some(conn) = &self.current {
            if !conn.is_errored() {
                return Ok(Rc::clone(conn));
            }
            debug!(peer = conn.peer(), "current connection is broken, replacing");
            self.retire_current();
        }

        let server = pool.next_live_server().ok_or(RpcError::NoServersAvailable)?;
        let (host, port) = split_address(&server)?;
        let conn = Rc::new(Connection::new(RpcConn::open(
            &host,
            port,
            options.connect_timeout,
            self.connect_hook(),
        )));
        debug!(peer = conn.peer(), "opened connection");
        self.request_count = 0;
        self.stats.connects += 1;
        self.current = Some(Rc::clone(&conn));
        Ok(conn)
    }

    /// Retires the current connection after a connection-level failure was
    /// classified for it. Only the first call to observe a given failure
    /// gets here; siblings see the bumped `error_count` and skip it.
    pub(crate) fn disconnect_on_error(&mut self) {
        if let Some(conn) = &self.current {
            warn!(peer = conn.peer(), "tearing down connection after failure");
        }
        self.retire_current();
        self.error_count += 1;
        self.stats.disconnects_on_error += 1;
    }

    /// Proactively rotates the connection once it served its request quota.
    /// Not counted as an error.
    pub(crate) fn disconnect_on_max(&mut self) {
        if let Some(conn) = &self.current {
            debug!(
                peer = conn.peer(),
                served = self.request_count,
                "request quota reached, rotating connection"
            );
        }
        if self.retire_current() {
            self.stats.disconnects_on_max += 1;
        }
    }

    /// Deliberate close requested by the caller.
    pub(crate) fn disconnect(&mut self) {
        if self.retire_current() {
            self.stats.explicit_disconnects += 1;
        }
    }

    /// Close-or-drain: a connection with calls still in flight is parked in
    /// the pending-shutdown set so those calls can finish; the socket goes
    /// away when the last of them does. Returns whether there was a
    /// connection to retire.
    fn retire_current(&mut self) -> bool {
        let Some(conn) = self.current.take() else {
            return false;
        };
        if conn.pending_requests() > 0 {
            debug!(
                peer = conn.peer(),
                pending = conn.pending_requests(),
                "draining connection"
            );
            self.pending_shutdown.push(Rc::clone(&conn));
        }
        conn.close();
        true
    }

    /// Drops retired connections whose last in-flight call has finished.
    fn prune_drained(&mut self) {
        self.pending_shutdown
            .retain(|conn| conn.pending_requests() > 0);
    }
}

fn split_address(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
        RpcError::InvalidAddress(format!("servers must be in the form \"host:port\", got {addr:?}"))
    })?;
    if host.is_empty() {
        return Err(RpcError::InvalidAddress(format!(
            "missing host in server address {addr:?}"
        )));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| RpcError::InvalidAddress(format!("bad port in server address {addr:?}")))?;
    Ok((host.to_string(), port))
}
