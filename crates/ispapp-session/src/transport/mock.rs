use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{RpcResponse, Transport};
use crate::error::TransportError;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: String,
    pub params: Value,
}

/// Scripted transport for tests and offline wiring.
///
/// Queued outcomes are returned in order; once the queue is empty every call
/// gets the fallback response (200 with no body unless changed).
pub struct MockTransport {
    script: Mutex<VecDeque<Result<RpcResponse, TransportError>>>,
    fallback: Mutex<Result<RpcResponse, TransportError>>,
    latency: Mutex<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(RpcResponse::new(200, None))),
            latency: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_response(&self, status: u16, body: Option<&str>) {
        self.script
            .lock()
            .push_back(Ok(RpcResponse::new(status, body.map(str::to_string))));
    }

    pub fn push_error(&self, err: TransportError) {
        self.script.lock().push_back(Err(err));
    }

    pub fn set_fallback(&self, outcome: Result<RpcResponse, TransportError>) {
        *self.fallback.lock() = outcome;
    }

    /// Delay applied to every call before it resolves.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn last_call(&self) -> Option<RecordedCall> {
        self.calls.lock().last().cloned()
    }

    /// Highest number of calls that were ever pending at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn call(&self, method: &str, params: Value) -> Result<RpcResponse, TransportError> {
        self.calls.lock().push(RecordedCall {
            method: method.to_string(),
            params,
        });
        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().clone());

        let pending = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(pending, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn replays_script_then_fallback() {
        let mock = MockTransport::new();
        mock.push_response(500, None);
        mock.push_error(TransportError::Timeout);

        assert_eq!(
            mock.call("checkconnection", json!({})).await,
            Ok(RpcResponse::new(500, None))
        );
        assert_eq!(
            mock.call("checkconnection", json!({})).await,
            Err(TransportError::Timeout)
        );
        assert_eq!(
            mock.call("signup", json!({"key": "k"})).await,
            Ok(RpcResponse::new(200, None))
        );

        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.last_call().unwrap().method, "signup");
    }
}
