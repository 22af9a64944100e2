use std::path::PathBuf;
use std::time::Duration;

use ispapp_config::{keys, ConfigStore};

pub const MIN_INTERVAL_SECS: u64 = 30;
pub const MAX_INTERVAL_SECS: u64 = 100;
/// Value written by the settings form when the option was never touched.
pub const DEFAULT_INTERVAL_SECS: u64 = 10;

const DEFAULT_UBUS_URL: &str = "http://127.0.0.1/ubus";
const ANONYMOUS_UBUS_SESSION: &str = "00000000000000000000000000000000";
const DEFAULT_RPC_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_CONFIG_PATH: &str = "/etc/config/ispapp";

/// Poll cadence, always within `[MIN_INTERVAL_SECS, MAX_INTERVAL_SECS]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingConfig {
    interval_secs: u64,
}

impl PollingConfig {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval_secs: interval_secs.clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS),
        }
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Read `UpdateInterval`, falling back to the form default.
    pub async fn from_store(store: &dyn ConfigStore) -> Self {
        let raw = store.get(keys::UPDATE_INTERVAL).await;
        let secs = raw
            .as_deref()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_INTERVAL_SECS);
        Self::new(secs)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL_SECS)
    }
}

/// Process-level settings taken from the environment.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ubus_url: String,
    pub ubus_session: String,
    pub rpc_timeout_ms: u64,
    pub config_path: PathBuf,
    pub log_filter: String,
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let ubus_url =
            std::env::var("ISPAPP_UBUS_URL").unwrap_or_else(|_| DEFAULT_UBUS_URL.into());
        let ubus_session = std::env::var("ISPAPP_UBUS_SESSION")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| ANONYMOUS_UBUS_SESSION.into());
        let rpc_timeout_ms = std::env::var("ISPAPP_RPC_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_RPC_TIMEOUT_MS);
        let config_path = std::env::var("ISPAPP_CONFIG_PATH")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into())
            .into();
        let log_filter =
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,ispapp_session=debug".into());
        Self {
            ubus_url,
            ubus_session,
            rpc_timeout_ms,
            config_path,
            log_filter,
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ispapp_config::InMemoryConfigStore;
    use serial_test::serial;

    #[test]
    fn interval_is_clamped() {
        assert_eq!(PollingConfig::new(5).interval_secs(), 30);
        assert_eq!(PollingConfig::new(45).interval_secs(), 45);
        assert_eq!(PollingConfig::new(500).interval_secs(), 100);
        assert_eq!(PollingConfig::default().interval_secs(), 30);
    }

    #[tokio::test]
    async fn interval_reads_update_interval_option() {
        let store = InMemoryConfigStore::with_values([(keys::UPDATE_INTERVAL, "45")]);
        assert_eq!(PollingConfig::from_store(store.as_ref()).await.interval_secs(), 45);

        let store = InMemoryConfigStore::with_values([(keys::UPDATE_INTERVAL, "soon")]);
        assert_eq!(PollingConfig::from_store(store.as_ref()).await.interval_secs(), 30);

        let store = InMemoryConfigStore::new();
        assert_eq!(PollingConfig::from_store(store.as_ref()).await.interval_secs(), 30);
    }

    #[test]
    #[serial]
    fn session_config_defaults() {
        for var in [
            "ISPAPP_UBUS_URL",
            "ISPAPP_UBUS_SESSION",
            "ISPAPP_RPC_TIMEOUT_MS",
            "ISPAPP_CONFIG_PATH",
        ] {
            std::env::remove_var(var);
        }
        let cfg = SessionConfig::from_env();
        assert_eq!(cfg.ubus_url, DEFAULT_UBUS_URL);
        assert_eq!(cfg.ubus_session, ANONYMOUS_UBUS_SESSION);
        assert_eq!(cfg.rpc_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.config_path, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    #[serial]
    fn session_config_reads_overrides() {
        std::env::set_var("ISPAPP_UBUS_URL", "http://192.168.1.1/ubus");
        std::env::set_var("ISPAPP_RPC_TIMEOUT_MS", "not-a-number");
        let cfg = SessionConfig::from_env();
        assert_eq!(cfg.ubus_url, "http://192.168.1.1/ubus");
        assert_eq!(cfg.rpc_timeout_ms, DEFAULT_RPC_TIMEOUT_MS);
        std::env::remove_var("ISPAPP_UBUS_URL");
        std::env::remove_var("ISPAPP_RPC_TIMEOUT_MS");
    }
}
