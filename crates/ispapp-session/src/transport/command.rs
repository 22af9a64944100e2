use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use super::ubus::ubus_status_message;
use super::{RpcResponse, Transport, OBJECT};
use crate::error::TransportError;

/// Runs `ubus call ispapp <method> '<json>'` on the device itself.
#[derive(Debug, Clone)]
pub struct UbusCliTransport {
    program: PathBuf,
    leading_args: Vec<String>,
    timeout: Duration,
}

impl UbusCliTransport {
    pub fn new(timeout: Duration) -> Self {
        Self::with_program("ubus", timeout)
    }

    pub fn with_program(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            timeout,
        }
    }

    /// Arguments placed before `call`, e.g. a wrapper script run through a shell.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl Transport for UbusCliTransport {
    async fn call(&self, method: &str, params: Value) -> Result<RpcResponse, TransportError> {
        let payload = params.to_string();
        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .arg("call")
            .arg(OBJECT)
            .arg(method)
            .arg(&payload)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        tracing::trace!(
            target: "ispapp::transport",
            program = %self.program.display(),
            method,
            "spawning ubus call"
        );
        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(TransportError::Network(format!(
                    "failed to run {}: {err}",
                    self.program.display()
                )))
            }
            Err(_) => return Err(TransportError::Timeout),
        };

        if !output.status.success() {
            let code = output.status.code().map(i64::from).unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                ubus_status_message(code).to_string()
            } else {
                stderr
            };
            return Err(TransportError::Remote { code, message });
        }

        let value: Value = serde_json::from_slice(&output.stdout)
            .map_err(|err| TransportError::MalformedEnvelope(err.to_string()))?;
        RpcResponse::from_result(&value)
    }
}
