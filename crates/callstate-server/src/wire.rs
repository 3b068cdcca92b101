//! JSON-lines wire protocol.
//!
//! Every frame is a single JSON object terminated by `\n`.
//!
//! ```text
//! → {"id":7,"method":"InitiateSession","params":{...}}
//! ← {"id":7,"result":{"MaxUsage":90000000000}}
//! ← {"id":7,"error":{"code":"SESSION_NOT_FOUND","message":"..."}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Longest frame accepted from a peer.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

pub mod methods {
    pub const INITIATE_SESSION: &str = "InitiateSession";
    pub const UPDATE_SESSION: &str = "UpdateSession";
    pub const TERMINATE_SESSION: &str = "TerminateSession";
    pub const GET_ACTIVE_SESSIONS: &str = "GetActiveSessions";
    pub const GET_PASSIVE_SESSIONS: &str = "GetPassiveSessions";
    pub const REPLICATE_SESSIONS: &str = "ReplicateSessions";
    pub const ACTIVATE_SESSIONS: &str = "ActivateSessions";
    pub const SET_PASSIVE_SESSION: &str = "SetPassiveSession";
    pub const REMOVE_PASSIVE_SESSION: &str = "RemovePassiveSession";
    pub const SET_PASSIVE_SESSIONS: &str = "SetPassiveSessions";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: u64, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(ErrorBody {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    /// The result payload, or the error body.
    pub fn into_result(self) -> Result<Value, ErrorBody> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Serializes `frame` followed by the line terminator.
pub fn encode_line<T: Serialize>(frame: &T) -> serde_json::Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(frame)?;
    bytes.push(b'\n');
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_params_default_to_null() {
        let request: Request = serde_json::from_str(r#"{"id":1,"method":"GetActiveSessions"}"#).unwrap();
        assert_eq!(request.params, Value::Null);
    }

    #[test]
    fn response_omits_absent_members() {
        let ok = encode_line(&Response::ok(3, json!("OK"))).unwrap();
        assert_eq!(ok, b"{\"id\":3,\"result\":\"OK\"}\n");

        let err = serde_json::to_value(Response::error(4, "NOT_FOUND", "not found")).unwrap();
        assert_eq!(
            err,
            json!({"id": 4, "error": {"code": "NOT_FOUND", "message": "not found"}})
        );
    }

    #[test]
    fn into_result_prefers_error() {
        let response = Response::error(1, "NOT_FOUND", "not found");
        assert_eq!(response.into_result().unwrap_err().code, "NOT_FOUND");
        assert_eq!(Response::ok(1, Value::Null).into_result().unwrap(), Value::Null);
    }
}
