use ispapp_config::StoreError;
use thiserror::Error;

/// Rejected before anything is sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid listener port: {0}")]
    InvalidPort(String),
    #[error("device is not registered")]
    NotRegistered,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("malformed rpc envelope: {0}")]
    MalformedEnvelope(String),
    #[error("rpc call failed with status {code}: {message}")]
    Remote { code: i64, message: String },
}

impl From<reqwest::Error> for TransportError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            TransportError::Timeout
        } else if value.is_decode() {
            TransportError::MalformedEnvelope(value.to_string())
        } else {
            TransportError::Network(value.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum SignupError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("signup rejected with status {status}")]
    Rejected { status: u16 },
    #[error("malformed signup response: {0}")]
    MalformedResponse(String),
    #[error("failed to persist credentials: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("token refresh rejected with status {status}")]
    Rejected { status: u16 },
    #[error("malformed token response: {0}")]
    MalformedResponse(String),
    #[error("failed to persist tokens: {0}")]
    Store(#[from] StoreError),
}

/// Failure of [`SessionManager::ensure_registered`](crate::SessionManager::ensure_registered).
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Refresh(#[from] RefreshError),
    #[error(transparent)]
    Signup(#[from] SignupError),
}
