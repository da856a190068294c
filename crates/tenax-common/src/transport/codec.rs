use crate::protocol::error::Result;
use crate::protocol::{Request, Response};

/// JSON codec for encoding/decoding RPC messages.
///
/// # Example
///
/// ```
/// use tenax_common::transport::JsonCodec;
/// use tenax_common::Request;
/// use serde_json::json;
///
/// let request = Request::new("greeting", json!({"name": "someone"}));
/// let encoded = JsonCodec::encode_request(&request).unwrap();
/// let decoded = JsonCodec::decode_request(&encoded).unwrap();
/// assert_eq!(request, decoded);
/// ```
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(request)?)
    }

    pub fn decode_request(data: &[u8]) -> Result<Request> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(response)?)
    }

    pub fn decode_response(data: &[u8]) -> Result<Response> {
        Ok(serde_json::from_slice(data)?)
    }
}
