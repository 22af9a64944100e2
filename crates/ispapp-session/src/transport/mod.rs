//! Remote calls into the `ispapp` ubus object.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;

pub mod command;
pub mod mock;
pub mod ubus;

pub use command::UbusCliTransport;
pub use mock::MockTransport;
pub use ubus::UbusHttpTransport;

/// ubus object the daemon registers.
pub const OBJECT: &str = "ispapp";
pub const CHECK_CONNECTION: &str = "checkconnection";
pub const SIGNUP: &str = "signup";

/// `{code, body}` payload returned by the `ispapp` methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcResponse {
    pub status: u16,
    pub body: Option<String>,
}

impl RpcResponse {
    pub fn new(status: u16, body: Option<String>) -> Self {
        Self { status, body }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    /// Decode the method result object. `code` may arrive as a number or a
    /// numeric string; a non-string `body` is re-encoded as JSON text.
    pub fn from_result(value: &Value) -> Result<Self, TransportError> {
        let object = value.as_object().ok_or_else(|| {
            TransportError::MalformedEnvelope(format!("expected result object, got {value}"))
        })?;

        let status = match object.get("code") {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
            _ => None,
        }
        .and_then(|code| u16::try_from(code).ok())
        .ok_or_else(|| TransportError::MalformedEnvelope("missing or invalid code".into()))?;

        let body = match object.get("body") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };

        Ok(Self { status, body })
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Invoke `method` on the `ispapp` object.
    async fn call(&self, method: &str, params: Value) -> Result<RpcResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_numeric_and_string_codes() {
        let res = RpcResponse::from_result(&json!({"code": 200})).unwrap();
        assert_eq!(res, RpcResponse::new(200, None));

        let res = RpcResponse::from_result(&json!({"code": "500", "body": "oops"})).unwrap();
        assert_eq!(res, RpcResponse::new(500, Some("oops".into())));
    }

    #[test]
    fn object_body_is_reencoded() {
        let res = RpcResponse::from_result(
            &json!({"code": 200, "body": {"accessToken": "a1", "refreshToken": "r1"}}),
        )
        .unwrap();
        let body: Value = serde_json::from_str(res.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["accessToken"], "a1");
    }

    #[test]
    fn rejects_missing_code() {
        assert!(matches!(
            RpcResponse::from_result(&json!({"body": "x"})),
            Err(TransportError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            RpcResponse::from_result(&json!([0])),
            Err(TransportError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            RpcResponse::from_result(&json!({"code": 70000})),
            Err(TransportError::MalformedEnvelope(_))
        ));
    }
}
