use std::fmt;
use std::sync::Arc;

use ispapp_config::{keys, ConfigStore};
use parking_lot::{Mutex as SyncMutex, RwLock};
use serde_json::{json, Value};
use time::OffsetDateTime;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::credentials::{non_empty, stage_tokens, DeviceCredentials, TokenPair};
use crate::error::{AuthError, RefreshError, SignupError, TransportError, ValidationError};
use crate::identity::{is_placeholder_login, DeviceIdentity, HardwareIdentity};
use crate::metrics;
use crate::transport::{RpcResponse, Transport, CHECK_CONNECTION, SIGNUP};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Unregistered,
    Registering,
    Connected,
    Disconnected,
    Error(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Unregistered => f.write_str("unregistered"),
            ConnectionState::Registering => f.write_str("registering"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

/// What the settings page shows: two states and an optional message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusDisplay {
    Connected,
    Disconnected,
}

/// Which step of [`SessionManager::ensure_registered`] produced the tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPath {
    /// Persisted tokens were used as is; nothing was sent.
    Stored,
    Refreshed,
    SignedUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub display: StatusDisplay,
    pub error: Option<String>,
    pub last_checked: Option<OffsetDateTime>,
}

/// Owns the connection state and token lifecycle of one device.
///
/// Every operation that can change state holds `op_lock` from before the
/// transport call until the credentials are committed, so a poller tick and
/// a manual signup or refresh never interleave.
pub struct SessionManager {
    store: Arc<dyn ConfigStore>,
    transport: Arc<dyn Transport>,
    identity: Arc<dyn DeviceIdentity>,
    op_lock: Mutex<()>,
    credentials: RwLock<DeviceCredentials>,
    last_checked: SyncMutex<Option<OffsetDateTime>>,
    state: watch::Sender<ConnectionState>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        transport: Arc<dyn Transport>,
        credentials: DeviceCredentials,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Unregistered);
        Self {
            store,
            transport,
            identity: Arc::new(HardwareIdentity::new()),
            op_lock: Mutex::new(()),
            credentials: RwLock::new(credentials),
            last_checked: SyncMutex::new(None),
            state,
        }
    }

    /// Source of the login generated when the settings carry a placeholder.
    pub fn with_identity(mut self, identity: Arc<dyn DeviceIdentity>) -> Self {
        self.identity = identity;
        self
    }

    /// Build a manager from whatever credentials are already persisted.
    pub async fn load(store: Arc<dyn ConfigStore>, transport: Arc<dyn Transport>) -> Arc<Self> {
        let credentials = DeviceCredentials::load(store.as_ref()).await;
        tracing::debug!(
            target: "ispapp::session",
            login = %credentials.login,
            domain = %credentials.domain,
            registered = credentials.is_registered(),
            "loaded device credentials"
        );
        Arc::new(Self::new(store, transport, credentials))
    }

    pub fn current_state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Last credentials that were committed successfully.
    pub fn credentials(&self) -> DeviceCredentials {
        self.credentials.read().clone()
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.current_state();
        let error = match &state {
            ConnectionState::Error(reason) => Some(reason.clone()),
            _ => None,
        };
        SessionStatus {
            display: if state.is_connected() {
                StatusDisplay::Connected
            } else {
                StatusDisplay::Disconnected
            },
            error,
            last_checked: *self.last_checked.lock(),
        }
    }

    pub async fn register_device(
        &self,
        credentials: DeviceCredentials,
    ) -> Result<DeviceCredentials, SignupError> {
        credentials.validate_for_signup()?;

        let _guard = self.op_lock.lock().await;
        self.register_locked(credentials).await
    }

    async fn register_locked(
        &self,
        credentials: DeviceCredentials,
    ) -> Result<DeviceCredentials, SignupError> {
        self.transition(ConnectionState::Registering);

        let params = json!({
            "login": credentials.login,
            "domain": credentials.domain,
            "listenerPort": credentials.listener_port,
            "key": credentials.key,
        });
        let result = self.signup(credentials, params).await;
        match &result {
            Ok(_) => metrics::SIGNUPS.with_label_values(&["ok"]).inc(),
            Err(err) => {
                metrics::SIGNUPS
                    .with_label_values(&[signup_outcome(err)])
                    .inc();
                self.fail(err);
            }
        }
        result
    }

    async fn signup(
        &self,
        credentials: DeviceCredentials,
        params: Value,
    ) -> Result<DeviceCredentials, SignupError> {
        let response = self.transport.call(SIGNUP, params).await?;
        if !response.is_ok() {
            return Err(SignupError::Rejected {
                status: response.status,
            });
        }
        let tokens = tokens_from(&response).map_err(SignupError::MalformedResponse)?;
        let registered = credentials.with_tokens(tokens);

        registered.stage(self.store.as_ref()).await;
        if let Err(err) = self.store.commit().await {
            self.store.revert().await;
            return Err(SignupError::Store(err));
        }

        *self.credentials.write() = registered.clone();
        self.mark_checked();
        self.transition(ConnectionState::Connected);
        tracing::info!(
            target: "ispapp::session",
            login = %registered.login,
            domain = %registered.domain,
            "device registered"
        );
        Ok(registered)
    }

    pub async fn check_connection(&self) -> Result<ConnectionState, TransportError> {
        self.probe(None).await
    }

    /// Connectivity probe on behalf of a poller. When `cancel` fires while
    /// the call is pending, the outcome is dropped and state is left alone.
    pub(crate) async fn probe(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<ConnectionState, TransportError> {
        let _guard = self.op_lock.lock().await;
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Ok(self.current_state());
        }

        let params = probe_params(&self.credentials.read());
        let outcome = self.transport.call(CHECK_CONNECTION, params).await;

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            tracing::debug!(
                target: "ispapp::session",
                "discarding connection check that finished after poller shutdown"
            );
            return outcome.map(|_| self.current_state());
        }

        self.mark_checked();
        match outcome {
            Ok(response) if response.is_ok() => {
                metrics::CONNECTION_CHECKS
                    .with_label_values(&["connected"])
                    .inc();
                self.transition(ConnectionState::Connected);
                Ok(ConnectionState::Connected)
            }
            Ok(response) => {
                metrics::CONNECTION_CHECKS
                    .with_label_values(&["disconnected"])
                    .inc();
                tracing::debug!(
                    target: "ispapp::session",
                    status = response.status,
                    "connection check returned non-200"
                );
                self.transition(ConnectionState::Disconnected);
                Ok(ConnectionState::Disconnected)
            }
            Err(err) => {
                metrics::CONNECTION_CHECKS
                    .with_label_values(&["error"])
                    .inc();
                tracing::warn!(
                    target: "ispapp::session",
                    error = %err,
                    "connection check failed"
                );
                self.transition(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    pub async fn refresh_tokens(&self) -> Result<DeviceCredentials, RefreshError> {
        let _guard = self.op_lock.lock().await;
        let refresh_token = self
            .credentials
            .read()
            .tokens
            .as_ref()
            .map(|tokens| tokens.refresh_token.clone());
        self.refresh_locked(refresh_token).await
    }

    async fn refresh_locked(
        &self,
        refresh_token: Option<String>,
    ) -> Result<DeviceCredentials, RefreshError> {
        let result = match refresh_token {
            Some(token) => self.refresh(&token).await,
            None => Err(ValidationError::NotRegistered.into()),
        };
        match &result {
            Ok(_) => metrics::TOKEN_REFRESHES.with_label_values(&["ok"]).inc(),
            Err(err) => {
                metrics::TOKEN_REFRESHES
                    .with_label_values(&[refresh_outcome(err)])
                    .inc();
                if !matches!(err, RefreshError::Validation(_)) {
                    self.fail(err);
                }
            }
        }
        result
    }

    async fn refresh(&self, refresh_token: &str) -> Result<DeviceCredentials, RefreshError> {
        let login = self.credentials.read().login.clone();
        let params = json!({
            "login": login,
            "refreshToken": refresh_token,
        });
        let response = self.transport.call(CHECK_CONNECTION, params).await?;
        if !response.is_ok() {
            return Err(RefreshError::Rejected {
                status: response.status,
            });
        }
        let tokens = tokens_from(&response).map_err(RefreshError::MalformedResponse)?;

        stage_tokens(self.store.as_ref(), &tokens).await;
        if let Err(err) = self.store.commit().await {
            self.store.revert().await;
            return Err(RefreshError::Store(err));
        }

        let updated = {
            let mut guard = self.credentials.write();
            guard.tokens = Some(tokens);
            guard.clone()
        };
        self.mark_checked();
        self.transition(ConnectionState::Connected);
        tracing::info!(target: "ispapp::session", login = %updated.login, "tokens rotated");
        Ok(updated)
    }

    /// Make sure the device holds tokens, trying in order: the persisted
    /// access token as is, a refresh with the persisted refresh token, then a
    /// signup with the persisted settings. A failed refresh is returned, not
    /// followed by a signup.
    ///
    /// Cached credentials are reloaded from the store first, so edits saved
    /// by the settings page are picked up.
    pub async fn ensure_registered(&self) -> Result<AuthPath, AuthError> {
        let _guard = self.op_lock.lock().await;

        let persisted = DeviceCredentials::load(self.store.as_ref()).await;
        *self.credentials.write() = persisted.clone();
        if persisted.is_registered() {
            tracing::debug!(target: "ispapp::session", "using persisted access token");
            return Ok(AuthPath::Stored);
        }

        if let Some(refresh_token) = non_empty(self.store.get(keys::REFRESH_TOKEN).await) {
            tracing::info!(
                target: "ispapp::session",
                "no usable access token; refreshing with the persisted refresh token"
            );
            self.refresh_locked(Some(refresh_token)).await?;
            return Ok(AuthPath::Refreshed);
        }

        persisted.validate_for_signup().map_err(SignupError::from)?;
        let mut credentials = persisted;
        if is_placeholder_login(&credentials.login) {
            credentials.login = self.assign_login().await?;
        }
        self.register_locked(credentials).await?;
        Ok(AuthPath::SignedUp)
    }

    /// Generate and persist a login so retries keep the same identity.
    async fn assign_login(&self) -> Result<String, SignupError> {
        let login = self.identity.device_id().await;
        self.store.set(keys::LOGIN, &login).await;
        if let Err(err) = self.store.commit().await {
            self.store.revert().await;
            let err = SignupError::Store(err);
            metrics::SIGNUPS.with_label_values(&[signup_outcome(&err)]).inc();
            self.fail(&err);
            return Err(err);
        }
        self.credentials.write().login = login.clone();
        tracing::info!(target: "ispapp::session", login = %login, "assigned device login");
        Ok(login)
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next.clone());
        if previous != next {
            tracing::info!(
                target: "ispapp::session",
                from = %previous,
                to = %next,
                "session state changed"
            );
        }
    }

    fn fail(&self, err: &dyn std::error::Error) {
        tracing::warn!(target: "ispapp::session", error = %err, "session operation failed");
        self.transition(ConnectionState::Error(err.to_string()));
    }

    fn mark_checked(&self) {
        *self.last_checked.lock() = Some(OffsetDateTime::now_utc());
    }
}

fn probe_params(credentials: &DeviceCredentials) -> Value {
    let mut params = json!({ "login": credentials.login });
    if let Some(tokens) = &credentials.tokens {
        params["accessToken"] = Value::String(tokens.access_token.clone());
    }
    params
}

fn tokens_from(response: &RpcResponse) -> Result<TokenPair, String> {
    let body = response
        .body
        .as_deref()
        .ok_or_else(|| "response carried no body".to_string())?;
    TokenPair::from_body(body)
}

fn signup_outcome(err: &SignupError) -> &'static str {
    match err {
        SignupError::Validation(_) => "invalid",
        SignupError::Transport(_) => "transport",
        SignupError::Rejected { .. } => "rejected",
        SignupError::MalformedResponse(_) => "malformed",
        SignupError::Store(_) => "store",
    }
}

fn refresh_outcome(err: &RefreshError) -> &'static str {
    match err {
        RefreshError::Validation(_) => "invalid",
        RefreshError::Transport(_) => "transport",
        RefreshError::Rejected { .. } => "rejected",
        RefreshError::MalformedResponse(_) => "malformed",
        RefreshError::Store(_) => "store",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use ispapp_config::InMemoryConfigStore;

    #[test]
    fn status_collapses_to_two_states() {
        let manager = SessionManager::new(
            InMemoryConfigStore::new(),
            MockTransport::new(),
            DeviceCredentials::default(),
        );
        let status = manager.status();
        assert_eq!(status.display, StatusDisplay::Disconnected);
        assert_eq!(status.error, None);
        assert_eq!(status.last_checked, None);

        manager.transition(ConnectionState::Error("boom".into()));
        let status = manager.status();
        assert_eq!(status.display, StatusDisplay::Disconnected);
        assert_eq!(status.error.as_deref(), Some("boom"));

        manager.transition(ConnectionState::Connected);
        assert_eq!(manager.status().display, StatusDisplay::Connected);
    }

    #[test]
    fn probe_params_include_access_token_only_when_registered() {
        let creds = DeviceCredentials::new("00:11:22:33:44:55", "d", 1, "k");
        assert_eq!(probe_params(&creds), json!({"login": "00:11:22:33:44:55"}));

        let creds = creds.with_tokens(TokenPair::new("a1", "r1"));
        assert_eq!(
            probe_params(&creds),
            json!({"login": "00:11:22:33:44:55", "accessToken": "a1"})
        );
    }

    #[tokio::test]
    async fn probe_after_cancel_leaves_state_untouched() {
        let transport = MockTransport::new();
        let manager = SessionManager::new(
            InMemoryConfigStore::new(),
            transport.clone(),
            DeviceCredentials::default(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let state = manager.probe(Some(&cancel)).await.unwrap();
        assert_eq!(state, ConnectionState::Unregistered);
        assert_eq!(transport.call_count(), 0);
    }
}
