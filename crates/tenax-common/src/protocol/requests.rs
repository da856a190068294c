use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

pub type RequestId = u64;
pub type MethodName = String;

/// RPC method arguments (JSON value)
pub type RpcArgs = serde_json::Value;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// A single RPC call on the wire.
///
/// Every request carries a process-unique `id`. Responses echo the id back,
/// which is what lets one connection carry several calls at once and match
/// each reply to its caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: MethodName,
    pub args: RpcArgs,
}

impl Request {
    pub fn new(method: impl Into<String>, args: RpcArgs) -> Self {
        Request {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            method: method.into(),
            args,
        }
    }
}
