//! The per-call retry state machine.
//!
//! One logical call walks `Idle -> Connecting -> Dispatched` and ends in
//! `Succeeded`, `Retrying` (back to the top with one fewer try) or `Failed`.
//! Terminal failures are routed through the error policy in [`finalize`].

use std::rc::Rc;

use serde_json::Value;
use tenax_common::RpcError;
use tracing::{debug, warn};

use crate::client::ClientInner;
use crate::future::ResultFuture;
use crate::options::RaisePolicy;

/// Drives one logical call to a terminal outcome. Spawned as a local task
/// per `invoke`; `tries` is the full budget (retries + 1).
pub(crate) async fn run_call(
    inner: Rc<ClientInner>,
    method: String,
    args: Value,
    mut tries: u32,
    future: ResultFuture,
) {
    loop {
        // Rotate a worn-out connection before it serves another call.
        {
            let mut manager = inner.manager.borrow_mut();
            if let Some(max) = inner.options.server_max_requests {
                if manager.request_count() >= max {
                    manager.disconnect_on_max();
                }
            }
        }

        // Snapshot taken before this attempt touches the connection: if a
        // sibling call tears the shared connection down first, the counter
        // moves and this attempt must not tear it down again.
        let error_count_at_start = inner.manager.borrow().error_count();

        // Bind this attempt to the connection that serves it. The client's
        // current connection may be replaced while the call is in flight;
        // bookkeeping below must stick to this one. The manager and pool
        // borrows must end before finalize: the continuations it runs may
        // reach back into the client.
        let ensured = {
            let mut manager = inner.manager.borrow_mut();
            let mut pool = inner.pool.borrow_mut();
            let ensured = manager.ensure_connection(pool.as_mut(), &inner.options);
            if ensured.is_ok() {
                manager.note_request();
            }
            ensured
        };
        let attempt_conn = match ensured {
            Ok(conn) => conn,
            Err(error) => {
                // Pool exhausted or malformed address: terminal, no retry
                // budget spent.
                finalize(&inner, &method, error, &future);
                return;
            }
        };

        attempt_conn.incr_request();
        let deadline = inner.options.timeout_for(&method);
        let outcome = match tokio::time::timeout(deadline, attempt_conn.call(&method, args.clone()))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(RpcError::Timeout(deadline.as_millis() as u64)),
        };
        attempt_conn.decr_request();

        let error = match outcome {
            Ok(value) => {
                future.succeed(value);
                return;
            }
            Err(error) => error,
        };

        if inner.options.is_connection_level(error.kind()) {
            {
                let mut manager = inner.manager.borrow_mut();
                if manager.error_count() == error_count_at_start {
                    manager.disconnect_on_error();
                }
            }
            tries -= 1;
            if tries > 0 {
                debug!(method, %error, tries_left = tries, "retrying after connection-level failure");
                continue;
            }
            warn!(method, %error, "retry budget exhausted");
            finalize(&inner, &method, error, &future);
            return;
        }

        // Application-level failure: the connection is fine, retrying the
        // same call would not help.
        finalize(&inner, &method, error, &future);
        return;
    }
}

/// Error policy: converts the last observed error into the caller-visible
/// behavior picked by `options.raise`.
fn finalize(inner: &ClientInner, method: &str, error: RpcError, future: &ResultFuture) {
    let wrapped = RpcError::wrap(error, method);
    match inner.options.raise {
        RaisePolicy::Suppress => future.succeed(inner.options.default_for(method)),
        RaisePolicy::Errback => future.fail(wrapped),
        RaisePolicy::Raise => inner.report_loop_error(wrapped),
    }
}
