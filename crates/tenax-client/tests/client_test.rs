//! Client integration tests.
//!
//! These drive the full retry/timeout/error-policy machinery against real
//! greeter servers on loopback:
//! - retry exhaustion against an unreachable server and against a
//!   too-slow method, with one teardown per attempt
//! - the three failure-reporting policies (suppress, raise, errback)
//! - graceful draining of a connection closed while calls are in flight
//! - proactive rotation via `server_max_requests`

mod support;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use serde_json::json;
use tenax_client::{Client, ClientOptions, RaisePolicy};
use tenax_common::{ErrorKind, RpcError};
use tokio::task::LocalSet;

use support::{dead_addr, GreeterServer};

#[tokio::test]
async fn retries_for_connection_failure() {
    support::init_tracing();
    let addr = dead_addr().await;

    let local = LocalSet::new();
    local
        .run_until(async move {
            let options = ClientOptions::default()
                .with_timeout(Duration::from_millis(200))
                .with_retries(4)
                .with_raise(RaisePolicy::Errback);
            let client = Client::from_servers(vec![addr], options);

            let err = client
                .invoke("greeting", json!({"name": "someone"}))
                .await
                .unwrap_err();

            assert_eq!(err.kind(), ErrorKind::Connection);
            assert!(
                matches!(&*err, RpcError::Call { method, .. } if method == "greeting"),
                "terminal error should be wrapped with the method name: {err}"
            );

            // One teardown per attempt, retries + 1 in total.
            let stats = client.stats();
            assert_eq!(stats.disconnects_on_error, 5);
            assert_eq!(stats.teardowns(), 5);
            assert_eq!(stats.connects, 5);
        })
        .await;
}

#[tokio::test]
async fn successful_method_call() {
    let server = GreeterServer::start().await;

    let local = LocalSet::new();
    local
        .run_until(async move {
            let options = ClientOptions::default().with_raise(RaisePolicy::Errback);
            let client = Client::from_servers(vec![server.addr()], options);

            let success_fired = Rc::new(Cell::new(false));
            let failure_fired = Rc::new(Cell::new(false));

            let call = client.invoke("greeting", json!({"name": "someone"}));
            let s = Rc::clone(&success_fired);
            call.on_success(move |_| s.set(true));
            let f = Rc::clone(&failure_fired);
            call.on_failure(move |_| f.set(true));

            let value = call.await.unwrap();
            assert_eq!(value, json!("hello there someone!"));
            assert!(success_fired.get());
            assert!(!failure_fired.get());

            assert_eq!(client.stats().teardowns(), 0);
            assert_eq!(client.stats().connects, 1);
        })
        .await;
}

#[tokio::test]
async fn retries_for_method_timeout() {
    let server = GreeterServer::start().await;

    let local = LocalSet::new();
    local
        .run_until(async move {
            let options = ClientOptions::default()
                .with_timeout_override("delayed_greeting", Duration::from_millis(200))
                .with_retries(2)
                .with_raise(RaisePolicy::Errback);
            let client = Client::from_servers(vec![server.addr()], options);

            let err = client
                .invoke("delayed_greeting", json!({"name": "someone", "delay_ms": 1000}))
                .await
                .unwrap_err();

            assert_eq!(err.kind(), ErrorKind::Timeout);
            let stats = client.stats();
            assert_eq!(stats.disconnects_on_error, 3);
            // Every attempt after the first reconnected.
            assert_eq!(stats.connects, 3);
        })
        .await;
}

#[tokio::test]
async fn raise_reports_to_supervisory_channel() {
    let server = GreeterServer::start().await;

    let local = LocalSet::new();
    local
        .run_until(async move {
            let options = ClientOptions::default()
                .with_timeout_override("delayed_greeting", Duration::from_millis(200))
                .with_retries(2)
                .with_raise(RaisePolicy::Raise);
            let client = Client::from_servers(vec![server.addr()], options);

            let (raised_tx, mut raised_rx) = tokio::sync::mpsc::unbounded_channel();
            client.set_error_handler(move |err| {
                let _ = raised_tx.send(err);
            });

            let success_fired = Rc::new(Cell::new(false));
            let failure_fired = Rc::new(Cell::new(false));

            let call = client.invoke("delayed_greeting", json!({"name": "someone", "delay_ms": 1000}));
            let s = Rc::clone(&success_fired);
            call.on_success(move |_| s.set(true));
            let f = Rc::clone(&failure_fired);
            call.on_failure(move |_| f.set(true));

            let raised = raised_rx.recv().await.expect("supervisory error");
            // The wrapped error keeps the original kind.
            assert_eq!(raised.kind(), ErrorKind::Timeout);
            assert!(matches!(&raised, RpcError::Call { method, .. } if method == "delayed_greeting"));

            // Neither channel of the call's future fired, and it never will.
            tokio::task::yield_now().await;
            assert!(!success_fired.get());
            assert!(!failure_fired.get());
            assert!(call.is_pending());

            assert_eq!(client.stats().disconnects_on_error, 3);
        })
        .await;
}

#[tokio::test]
async fn errback_fails_the_future_without_raising() {
    let addr = dead_addr().await;

    let local = LocalSet::new();
    local
        .run_until(async move {
            let options = ClientOptions::default()
                .with_retries(1)
                .with_raise(RaisePolicy::Errback);
            let client = Client::from_servers(vec![addr], options);

            let raised = Rc::new(Cell::new(0u32));
            let counter = Rc::clone(&raised);
            client.set_error_handler(move |_| counter.set(counter.get() + 1));

            let err = client.invoke("greeting", json!({})).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Connection);
            assert_eq!(raised.get(), 0);
        })
        .await;
}

#[tokio::test]
async fn suppress_resolves_with_configured_default() {
    let addr = dead_addr().await;

    let local = LocalSet::new();
    local
        .run_until(async move {
            let options = ClientOptions::default()
                .with_retries(0)
                .with_default("greeting", json!("hello by default"));
            let client = Client::from_servers(vec![addr], options);

            let value = client
                .invoke("greeting", json!({"name": "someone"}))
                .await
                .unwrap();
            assert_eq!(value, json!("hello by default"));

            // A method without a configured default degrades to null.
            let value = client.invoke("yo", json!({})).await.unwrap();
            assert_eq!(value, serde_json::Value::Null);
        })
        .await;
}

#[tokio::test]
async fn failure_continuation_can_use_the_client() {
    let local = LocalSet::new();
    local
        .run_until(async move {
            let options = ClientOptions::default().with_raise(RaisePolicy::Errback);
            let client = Client::from_servers(vec![], options);

            // The continuation reaches back into the client; the dispatcher
            // must not be holding any of its internals when it runs.
            let observed = Rc::new(Cell::new(None));
            let call = client.invoke("greeting", json!({}));
            {
                let client = client.clone();
                let observed = Rc::clone(&observed);
                call.on_failure(move |_| {
                    client.disconnect();
                    observed.set(Some(client.stats().connects));
                });
            }

            call.await.unwrap_err();
            assert_eq!(observed.get(), Some(0));
        })
        .await;
}

#[tokio::test]
async fn empty_pool_fails_immediately() {
    let local = LocalSet::new();
    local
        .run_until(async move {
            let options = ClientOptions::default()
                .with_retries(5)
                .with_raise(RaisePolicy::Errback);
            let client = Client::from_servers(vec![], options);

            let err = client.invoke("greeting", json!({})).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NoServers);
            // Bypasses the retry budget entirely.
            assert_eq!(client.stats().connects, 0);
            assert_eq!(client.stats().teardowns(), 0);
        })
        .await;
}

#[tokio::test]
async fn malformed_address_is_terminal() {
    let local = LocalSet::new();
    local
        .run_until(async move {
            let options = ClientOptions::default()
                .with_retries(5)
                .with_raise(RaisePolicy::Errback);
            let client = Client::from_servers(vec!["not-an-address".to_string()], options);

            let err = client.invoke("greeting", json!({})).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidAddress);
            assert_eq!(client.stats().connects, 0);
        })
        .await;
}

#[tokio::test]
async fn application_errors_do_not_retry_or_teardown() {
    let server = GreeterServer::start().await;

    let local = LocalSet::new();
    local
        .run_until(async move {
            let options = ClientOptions::default()
                .with_retries(4)
                .with_raise(RaisePolicy::Errback);
            let client = Client::from_servers(vec![server.addr()], options);

            let err = client.invoke("no_such_method", json!({})).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Application);

            // The connection survives and serves the next call.
            assert_eq!(client.stats().teardowns(), 0);
            assert_eq!(client.stats().connects, 1);
            let value = client
                .invoke("greeting", json!({"name": "someone"}))
                .await
                .unwrap();
            assert_eq!(value, json!("hello there someone!"));
        })
        .await;
}

#[tokio::test]
async fn explicit_close_drains_in_flight_calls() {
    support::init_tracing();
    let server_a = GreeterServer::start().await;
    let server_b = GreeterServer::start().await;

    let local = LocalSet::new();
    local
        .run_until(async move {
            let options = ClientOptions::default()
                .with_timeout(Duration::from_secs(2))
                .with_raise(RaisePolicy::Errback);
            let client = Client::from_servers(vec![server_a.addr(), server_b.addr()], options);

            let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

            // Submitted in order: fast, 0.7s, 0.4s. All three share the
            // first connection.
            let fast = client.invoke("greeting", json!({"name": "someone"}));
            let slow = client.invoke("delayed_greeting", json!({"name": "a", "delay_ms": 700}));
            let medium = client.invoke("delayed_greeting", json!({"name": "b", "delay_ms": 400}));

            {
                let order = Rc::clone(&order);
                let client = client.clone();
                fast.on_success(move |_| {
                    order.borrow_mut().push("fast");
                    // Close the connection while the other two are still
                    // pending on it.
                    client.disconnect();
                });
            }
            {
                let order = Rc::clone(&order);
                slow.on_success(move |_| order.borrow_mut().push("slow"));
            }
            {
                let order = Rc::clone(&order);
                medium.on_success(move |_| order.borrow_mut().push("medium"));
            }

            let results = futures::future::join_all(vec![slow, medium]).await;
            for result in results {
                result.unwrap();
            }

            // Later-submitted but shorter call finished first.
            assert_eq!(*order.borrow(), vec!["fast", "medium", "slow"]);

            // Exactly one teardown, from the explicit close; no failures.
            let stats = client.stats();
            assert_eq!(stats.explicit_disconnects, 1);
            assert_eq!(stats.teardowns(), 1);
            assert_eq!(stats.disconnects_on_error, 0);

            // The retired connection drained but is only pruned when the
            // next call ensures a connection.
            assert!(!client.has_connection());
            assert_eq!(client.draining_connections(), 1);

            let value = client
                .invoke("greeting", json!({"name": "again"}))
                .await
                .unwrap();
            assert_eq!(value, json!("hello there again!"));
            assert_eq!(client.draining_connections(), 0);
            assert_eq!(client.stats().connects, 2);
        })
        .await;
}

#[tokio::test]
async fn server_max_requests_rotates_proactively() {
    let server = GreeterServer::start().await;

    let local = LocalSet::new();
    local
        .run_until(async move {
            let options = ClientOptions::default()
                .with_raise(RaisePolicy::Errback)
                .with_server_max_requests(2);
            let client = Client::from_servers(vec![server.addr()], options);

            for i in 0..5 {
                let value = client
                    .invoke("greeting", json!({"name": format!("n{i}")}))
                    .await
                    .unwrap();
                assert_eq!(value, json!(format!("hello there n{i}!")));
            }

            // Two calls per connection: rotated after calls 2 and 4.
            let stats = client.stats();
            assert_eq!(stats.disconnects_on_max, 2);
            assert_eq!(stats.disconnects_on_error, 0);
            assert_eq!(stats.connects, 3);
        })
        .await;
}

#[tokio::test]
async fn per_method_retry_override_controls_attempts() {
    let addr = dead_addr().await;

    let local = LocalSet::new();
    local
        .run_until(async move {
            let options = ClientOptions::default()
                .with_retries(4)
                .with_retry_override("greeting", 0)
                .with_raise(RaisePolicy::Errback);
            let client = Client::from_servers(vec![addr], options);

            client.invoke("greeting", json!({})).await.unwrap_err();
            // Override wins over the default budget: a single attempt.
            assert_eq!(client.stats().disconnects_on_error, 1);
        })
        .await;
}

#[tokio::test]
async fn post_connect_hook_fires_once() {
    let server = GreeterServer::start().await;

    let local = LocalSet::new();
    local
        .run_until(async move {
            let options = ClientOptions::default().with_raise(RaisePolicy::Errback);
            let client = Client::from_servers(vec![server.addr()], options);

            let fired = Rc::new(Cell::new(0u32));
            let counter = Rc::clone(&fired);
            client.on_connect(move || counter.set(counter.get() + 1));

            client.invoke("greeting", json!({})).await.unwrap();
            client.invoke("greeting", json!({})).await.unwrap();

            assert_eq!(fired.get(), 1);
        })
        .await;
}

#[tokio::test]
async fn post_connect_hook_survives_a_failed_connect() {
    let dead = dead_addr().await;
    let server = GreeterServer::start().await;

    let local = LocalSet::new();
    local
        .run_until(async move {
            let options = ClientOptions::default()
                .with_retries(2)
                .with_raise(RaisePolicy::Errback);
            let client = Client::from_servers(vec![dead, server.addr()], options);

            let fired = Rc::new(Cell::new(0u32));
            let counter = Rc::clone(&fired);
            client.on_connect(move || counter.set(counter.get() + 1));

            // First attempt hits the dead server; the retry reconnects to
            // the live one and that connect fires the hook.
            let value = client
                .invoke("greeting", json!({"name": "someone"}))
                .await
                .unwrap();
            assert_eq!(value, json!("hello there someone!"));
            assert_eq!(fired.get(), 1);
            assert_eq!(client.stats().connects, 2);
        })
        .await;
}

#[tokio::test]
async fn explicit_disconnect_does_not_count_a_rotation() {
    let server = GreeterServer::start().await;

    let local = LocalSet::new();
    local
        .run_until(async move {
            let options = ClientOptions::default()
                .with_raise(RaisePolicy::Errback)
                .with_server_max_requests(1);
            let client = Client::from_servers(vec![server.addr()], options);

            client.invoke("greeting", json!({})).await.unwrap();
            // The quota is spent; close before another call so the next
            // invoke finds no connection to rotate.
            client.disconnect();

            client.invoke("greeting", json!({})).await.unwrap();

            let stats = client.stats();
            assert_eq!(stats.explicit_disconnects, 1);
            assert_eq!(stats.disconnects_on_max, 0);
            assert_eq!(stats.connects, 2);
        })
        .await;
}
