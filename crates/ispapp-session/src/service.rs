use std::sync::Arc;

use ispapp_config::{StoreError, UciFileStore};
use thiserror::Error;

use crate::config::{PollingConfig, SessionConfig};
use crate::error::TransportError;
use crate::poller::{PollerHandle, StatusPoller};
use crate::session::SessionManager;
use crate::telemetry::init_tracing;
use crate::transport::UbusHttpTransport;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to open settings: {0}")]
    Store(#[from] StoreError),
    #[error("failed to build transport: {0}")]
    Transport(#[from] TransportError),
}

/// A running device session: settings file, ubus transport, session manager
/// and status poller wired together.
pub struct Service {
    store: Arc<UciFileStore>,
    session: Arc<SessionManager>,
    poller: PollerHandle,
}

impl Service {
    pub async fn start(config: &SessionConfig) -> Result<Self, StartupError> {
        init_tracing(&config.log_filter);

        let store = Arc::new(UciFileStore::open(config.config_path.clone()).await?);
        let transport = Arc::new(UbusHttpTransport::from_config(config)?);
        let session = SessionManager::load(store.clone(), transport).await;
        let polling = PollingConfig::from_store(store.as_ref()).await;
        let poller = StatusPoller::spawn(Arc::clone(&session), polling);

        tracing::info!(
            target: "ispapp::session",
            settings = %config.config_path.display(),
            ubus = %config.ubus_url,
            rpc_timeout_ms = config.rpc_timeout_ms,
            interval_secs = polling.interval_secs(),
            "device session started"
        );
        Ok(Self {
            store,
            session,
            poller,
        })
    }

    pub fn session(&self) -> Arc<SessionManager> {
        Arc::clone(&self.session)
    }

    pub fn store(&self) -> Arc<UciFileStore> {
        Arc::clone(&self.store)
    }

    pub fn poller(&self) -> &PollerHandle {
        &self.poller
    }

    /// Stop polling and wait for the poller to exit.
    pub async fn shutdown(self) {
        self.poller.join().await;
        tracing::info!(target: "ispapp::session", "device session stopped");
    }
}
