//! JSON-RPC protocol types for the tool surface.
//!
//! Wire format: line-delimited JSON over stdin/stdout.
//! - Requests have `id` + `method` + optional `params`
//! - Responses have `id` + `result` or `error`

use serde::{Deserialize, Serialize};

/// Incoming tool request.
#[derive(Debug, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Outgoing response.
#[derive(Debug, Serialize)]
pub struct Response {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, error: RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

// Error codes
pub const ERR_INVALID_PARAMS: i32 = -32602;
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERR_INTERNAL: i32 = -32603;
pub const ERR_AUTH: i32 = -1;
pub const ERR_CONNECT: i32 = -2;
pub const ERR_TIMEOUT: i32 = -3;
pub const ERR_TRANSPORT: i32 = -4;
pub const ERR_NOT_FOUND: i32 = -5;
pub const ERR_EXEC: i32 = -6;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_response_omits_error() {
        let response = Response::ok(7, serde_json::json!({"x": 1}));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["result"]["x"], 1);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_err_response_omits_result() {
        let response = Response::err(3, RpcError::new(ERR_NOT_FOUND, "missing"));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["error"]["code"], ERR_NOT_FOUND);
        assert_eq!(value["error"]["message"], "missing");
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_request_params_default_to_null() {
        let request: Request =
            serde_json::from_str(r#"{"id": 1, "method": "connections"}"#).unwrap();
        assert!(request.params.is_null());
    }
}
