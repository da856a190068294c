//! RPC response types.

use serde::{Deserialize, Serialize};

use super::RequestId;

/// RPC method result (JSON value)
pub type RpcResult = serde_json::Value;

/// An RPC response returned from a server to the client.
///
/// # Fields
///
/// - `id`: The request id this response corresponds to
/// - `result`: The result value (present on success)
/// - `error`: Error message (present on failure)
/// - `success`: Whether the call succeeded
///
/// A failed response describes an application-level error raised by the
/// remote procedure itself; transport failures never appear as responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    /// Request identifier this response corresponds to
    pub id: RequestId,
    /// Result value (present on success)
    pub result: Option<RpcResult>,
    /// Error message (present on failure)
    pub error: Option<String>,
    /// Whether the call succeeded
    pub success: bool,
}

impl Response {
    /// Creates a successful response.
    ///
    /// ```
    /// use tenax_common::Response;
    /// use serde_json::json;
    ///
    /// let response = Response::success(123, json!("hello"));
    /// assert!(response.success);
    /// assert_eq!(response.result, Some(json!("hello")));
    /// ```
    pub fn success(id: RequestId, result: RpcResult) -> Self {
        Response {
            id,
            result: Some(result),
            error: None,
            success: true,
        }
    }

    /// Creates an error response.
    ///
    /// ```
    /// use tenax_common::Response;
    ///
    /// let response = Response::error(123, "no such method");
    /// assert!(!response.success);
    /// assert_eq!(response.error, Some("no such method".to_string()));
    /// ```
    pub fn error(id: RequestId, error: impl Into<String>) -> Self {
        Response {
            id,
            result: None,
            error: Some(error.into()),
            success: false,
        }
    }
}
