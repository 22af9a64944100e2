use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::{RpcResponse, Transport, OBJECT};
use crate::config::SessionConfig;
use crate::error::TransportError;

const UBUS_STATUS_TIMEOUT: i64 = 7;

/// JSON-RPC client for the LuCI `/ubus` endpoint.
#[derive(Debug)]
pub struct UbusHttpTransport {
    client: Client,
    endpoint: Url,
    session: String,
    next_id: AtomicU64,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: (&'a str, &'static str, &'a str, Value),
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    #[serde(default)]
    message: String,
}

impl UbusHttpTransport {
    pub fn new(
        endpoint: Url,
        session: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| TransportError::Network(err.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            session: session.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self, TransportError> {
        let endpoint = Url::parse(&config.ubus_url).map_err(|err| {
            TransportError::Network(format!("invalid ubus url '{}': {err}", config.ubus_url))
        })?;
        Self::new(endpoint, config.ubus_session.clone(), config.rpc_timeout())
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for UbusHttpTransport {
    async fn call(&self, method: &str, params: Value) -> Result<RpcResponse, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method: "call",
            params: (self.session.as_str(), OBJECT, method, params),
        };

        tracing::trace!(target: "ispapp::transport", id, method, "ubus call");
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Network(format!(
                "ubus endpoint returned {status}"
            )));
        }

        let text = response.text().await?;
        let envelope: RpcEnvelope = serde_json::from_str(&text)
            .map_err(|err| TransportError::MalformedEnvelope(err.to_string()))?;
        decode_envelope(envelope)
    }
}

fn decode_envelope(envelope: RpcEnvelope) -> Result<RpcResponse, TransportError> {
    if let Some(err) = envelope.error {
        return Err(TransportError::Remote {
            code: err.code,
            message: err.message,
        });
    }

    let result = envelope
        .result
        .ok_or_else(|| TransportError::MalformedEnvelope("neither result nor error".into()))?;
    let items = result
        .as_array()
        .ok_or_else(|| TransportError::MalformedEnvelope("result is not an array".into()))?;

    let code = items
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| TransportError::MalformedEnvelope("missing ubus status".into()))?;
    match code {
        0 => {}
        UBUS_STATUS_TIMEOUT => return Err(TransportError::Timeout),
        other => {
            return Err(TransportError::Remote {
                code: other,
                message: ubus_status_message(other).to_string(),
            })
        }
    }

    let data = items
        .get(1)
        .ok_or_else(|| TransportError::MalformedEnvelope("ubus call returned no data".into()))?;
    RpcResponse::from_result(data)
}

pub(crate) fn ubus_status_message(code: i64) -> &'static str {
    match code {
        1 => "invalid command",
        2 => "invalid argument",
        3 => "method not found",
        4 => "not found",
        5 => "no data",
        6 => "permission denied",
        7 => "timeout",
        8 => "not supported",
        10 => "connection failed",
        _ => "unknown error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(value: Value) -> RpcEnvelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn success_envelope_yields_method_result() {
        let res = decode_envelope(envelope(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": [0, {"code": 200, "body": "{}"}]
        })))
        .unwrap();
        assert_eq!(res, RpcResponse::new(200, Some("{}".into())));
    }

    #[test]
    fn ubus_status_maps_to_remote_or_timeout() {
        let err = decode_envelope(envelope(json!({"result": [6]}))).unwrap_err();
        assert_eq!(
            err,
            TransportError::Remote {
                code: 6,
                message: "permission denied".into()
            }
        );

        let err = decode_envelope(envelope(json!({"result": [7]}))).unwrap_err();
        assert_eq!(err, TransportError::Timeout);
    }

    #[test]
    fn jsonrpc_error_maps_to_remote() {
        let err = decode_envelope(envelope(json!({
            "error": {"code": -32002, "message": "Access denied"}
        })))
        .unwrap_err();
        assert_eq!(
            err,
            TransportError::Remote {
                code: -32002,
                message: "Access denied".into()
            }
        );
    }

    #[test]
    fn empty_envelope_is_malformed() {
        assert!(matches!(
            decode_envelope(envelope(json!({}))),
            Err(TransportError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            decode_envelope(envelope(json!({"result": [0]}))),
            Err(TransportError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn request_uses_ubus_call_shape() {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 3,
            method: "call",
            params: ("sid", OBJECT, "checkconnection", json!({"login": "x"})),
        };
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(
            encoded,
            json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "call",
                "params": ["sid", "ispapp", "checkconnection", {"login": "x"}]
            })
        );
    }
}
