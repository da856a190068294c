use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde_json::Value;
use tenax_common::ErrorKind;

/// How a terminal, unrecoverable call failure is reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RaisePolicy {
    /// Resolve the call's success channel with the configured default value
    /// for the method. No error ever reaches the caller through the future.
    #[default]
    Suppress,
    /// Hand the wrapped error to the client's supervisory error handler.
    /// Neither channel of the call's future fires.
    Raise,
    /// Resolve the call's failure channel with the wrapped error.
    Errback,
}

/// Client configuration. Immutable once the client is built.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tenax_client::{ClientOptions, RaisePolicy};
///
/// let options = ClientOptions::default()
///     .with_timeout(Duration::from_millis(200))
///     .with_timeout_override("delayed_greeting", Duration::from_secs(2))
///     .with_retries(4)
///     .with_raise(RaisePolicy::Errback);
/// ```
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Default per-call deadline.
    pub timeout: Duration,
    /// Per-method deadline overrides.
    pub timeout_overrides: HashMap<String, Duration>,
    /// Default retry budget; a call gets `retries + 1` attempts in total.
    pub retries: u32,
    /// Per-method retry budget overrides.
    pub retry_overrides: HashMap<String, u32>,
    /// Failure reporting mode, see [`RaisePolicy`].
    pub raise: RaisePolicy,
    /// Per-method fallback values used under [`RaisePolicy::Suppress`].
    /// A method with no entry falls back to `Value::Null`.
    pub defaults: HashMap<String, Value>,
    /// Error kinds treated as connection-level, i.e. worth tearing the
    /// connection down and retrying. Timeouts are always connection-level
    /// regardless of this set.
    pub retryable_errors: HashSet<ErrorKind>,
    /// Cap on calls served by one connection before it is proactively
    /// rotated to the next server.
    pub server_max_requests: Option<u32>,
    /// Deadline for establishing a new connection.
    pub connect_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            timeout_overrides: HashMap::new(),
            retries: 3,
            retry_overrides: HashMap::new(),
            raise: RaisePolicy::default(),
            defaults: HashMap::new(),
            retryable_errors: [ErrorKind::Connection, ErrorKind::Io].into_iter().collect(),
            server_max_requests: None,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_timeout_override(mut self, method: impl Into<String>, timeout: Duration) -> Self {
        self.timeout_overrides.insert(method.into(), timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_override(mut self, method: impl Into<String>, retries: u32) -> Self {
        self.retry_overrides.insert(method.into(), retries);
        self
    }

    pub fn with_raise(mut self, raise: RaisePolicy) -> Self {
        self.raise = raise;
        self
    }

    pub fn with_default(mut self, method: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(method.into(), value);
        self
    }

    pub fn with_retryable_error(mut self, kind: ErrorKind) -> Self {
        self.retryable_errors.insert(kind);
        self
    }

    pub fn with_server_max_requests(mut self, max: u32) -> Self {
        self.server_max_requests = Some(max);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Effective deadline for one attempt of `method`.
    pub(crate) fn timeout_for(&self, method: &str) -> Duration {
        self.timeout_overrides
            .get(method)
            .copied()
            .unwrap_or(self.timeout)
    }

    /// Total attempts allowed for `method`: configured retries plus one.
    pub(crate) fn tries_for(&self, method: &str) -> u32 {
        self.retry_overrides
            .get(method)
            .copied()
            .unwrap_or(self.retries)
            + 1
    }

    /// Fallback value delivered under [`RaisePolicy::Suppress`].
    pub(crate) fn default_for(&self, method: &str) -> Value {
        self.defaults.get(method).cloned().unwrap_or(Value::Null)
    }

    /// Whether an error of this kind tears the connection down and retries.
    pub(crate) fn is_connection_level(&self, kind: ErrorKind) -> bool {
        kind == ErrorKind::Timeout || self.retryable_errors.contains(&kind)
    }
}
