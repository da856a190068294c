use thiserror::Error;

pub type Result<T> = std::result::Result<T, RpcError>;

/// Errors produced by the tenax protocol and transport layers.
///
/// The client's retry logic does not match on variants directly; it asks for
/// the error's [`ErrorKind`] and checks it against the configured set of
/// connection-level kinds.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Transport-level failure: connect refused, peer reset, broken socket.
    #[error("connection error: {0}")]
    Connection(String),

    /// Synthesized when a call (or a pending connect) exceeds its deadline.
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// Error value returned by the remote procedure itself.
    #[error("application error: {0}")]
    Application(String),

    /// The server pool had no candidate to offer.
    #[error("no servers available")]
    NoServersAvailable,

    /// A configured server address was not of the form `host:port`.
    #[error("invalid server address: {0}")]
    InvalidAddress(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A terminal error annotated with the method it failed on, produced by
    /// [`RpcError::wrap`]. [`RpcError::kind`] sees through the wrapper so
    /// the original classification is preserved.
    #[error("call to `{method}` failed: {source}")]
    Call {
        method: String,
        #[source]
        source: Box<RpcError>,
    },
}

/// Coarse classification of an [`RpcError`], used to decide whether a
/// failure is connection-level (worth tearing the connection down and
/// retrying on a fresh one) or specific to the call that observed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    Timeout,
    Application,
    NoServers,
    InvalidAddress,
    Serialization,
    Io,
}

impl RpcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::Connection(_) => ErrorKind::Connection,
            RpcError::Timeout(_) => ErrorKind::Timeout,
            RpcError::Application(_) => ErrorKind::Application,
            RpcError::NoServersAvailable => ErrorKind::NoServers,
            RpcError::InvalidAddress(_) => ErrorKind::InvalidAddress,
            RpcError::Serialization(_) => ErrorKind::Serialization,
            RpcError::Io(_) => ErrorKind::Io,
            RpcError::Call { source, .. } => source.kind(),
        }
    }

    /// Wraps a terminal error with the method name it failed on.
    pub fn wrap(error: RpcError, method: &str) -> RpcError {
        RpcError::Call {
            method: method.to_string(),
            source: Box::new(error),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}
