pub mod error;
pub mod requests;
pub mod responses;


pub use error::{ErrorKind, Result, RpcError};
pub use requests::{MethodName, Request, RequestId, RpcArgs};
pub use responses::{Response, RpcResult};
