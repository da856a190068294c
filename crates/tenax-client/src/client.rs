use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;
use tenax_common::RpcError;
use tracing::error;

use crate::dispatch;
use crate::future::ResultFuture;
use crate::manager::ConnectionManager;
use crate::options::ClientOptions;
use crate::pool::{RoundRobinPool, ServerPool};

/// Counters for connection lifecycle events. Useful for tests and for
/// operational visibility into how often the client is reconnecting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Connections opened.
    pub connects: u32,
    /// Teardowns triggered by a classified connection-level failure.
    pub disconnects_on_error: u32,
    /// Proactive rotations after `server_max_requests` calls.
    pub disconnects_on_max: u32,
    /// Deliberate closes via [`Client::disconnect`].
    pub explicit_disconnects: u32,
}

impl ClientStats {
    /// Total connection teardowns, whatever the trigger.
    pub fn teardowns(&self) -> u32 {
        self.disconnects_on_error + self.disconnects_on_max + self.explicit_disconnects
    }
}

pub(crate) type ErrorHandler = Box<dyn Fn(RpcError)>;

pub(crate) struct ClientInner {
    pub(crate) options: ClientOptions,
    pub(crate) pool: RefCell<Box<dyn ServerPool>>,
    pub(crate) manager: RefCell<ConnectionManager>,
    pub(crate) error_handler: RefCell<Option<ErrorHandler>>,
}

impl ClientInner {
    /// Supervisory error channel: failures under
    /// [`RaisePolicy::Raise`](crate::RaisePolicy::Raise) land here, not in
    /// any call's future.
    pub(crate) fn report_loop_error(&self, err: RpcError) {
        let handler = self.error_handler.borrow();
        match handler.as_ref() {
            Some(handler) => handler(err),
            None => error!(error = %err, "unhandled RPC failure"),
        }
    }
}

/// Resilient RPC client.
///
/// New calls share one pooled connection; connection-level failures tear it
/// down (draining any calls still in flight on it) and retries reconnect,
/// rotating through the server pool.
///
/// The client is single-threaded: create and use it inside a
/// [`tokio::task::LocalSet`] on a current-thread runtime. Clones share the
/// same connection and counters.
#[derive(Clone)]
pub struct Client {
    inner: Rc<ClientInner>,
}

impl Client {
    pub fn new(pool: impl ServerPool + 'static, options: ClientOptions) -> Self {
        Client {
            inner: Rc::new(ClientInner {
                options,
                pool: RefCell::new(Box::new(pool)),
                manager: RefCell::new(ConnectionManager::new()),
                error_handler: RefCell::new(None),
            }),
        }
    }

    /// Builds a client over a round-robin pool of `"host:port"` addresses.
    pub fn from_servers(servers: Vec<String>, options: ClientOptions) -> Self {
        Self::new(RoundRobinPool::new(servers), options)
    }

    /// Issues `method` with `args`.
    ///
    /// Returns the call's future immediately; the retry state machine runs
    /// as a local task. Total attempts = configured retries for the method
    /// plus one.
    pub fn invoke(&self, method: &str, args: Value) -> ResultFuture {
        let future = ResultFuture::new();
        let tries = self.inner.options.tries_for(method);
        tokio::task::spawn_local(dispatch::run_call(
            Rc::clone(&self.inner),
            method.to_string(),
            args,
            tries,
            future.clone(),
        ));
        future
    }

    /// Deliberately closes the current connection. Calls still in flight on
    /// it finish first; the next `invoke` connects to the next server.
    pub fn disconnect(&self) {
        self.inner.manager.borrow_mut().disconnect();
    }

    /// Registers a hook to run once, right after the next connection is
    /// established.
    pub fn on_connect(&self, hook: impl FnOnce() + 'static) {
        self.inner
            .manager
            .borrow_mut()
            .set_post_connect(Box::new(hook));
    }

    /// Installs the supervisory error handler used by
    /// [`RaisePolicy::Raise`](crate::RaisePolicy::Raise). Without one,
    /// raised errors are logged.
    pub fn set_error_handler(&self, handler: impl Fn(RpcError) + 'static) {
        *self.inner.error_handler.borrow_mut() = Some(Box::new(handler));
    }

    pub fn stats(&self) -> ClientStats {
        self.inner.manager.borrow().stats()
    }

    /// Whether a connection is currently active for new calls.
    pub fn has_connection(&self) -> bool {
        self.inner.manager.borrow().has_connection()
    }

    /// Number of retired connections still draining in-flight calls.
    pub fn draining_connections(&self) -> usize {
        self.inner.manager.borrow().draining_connections()
    }
}
