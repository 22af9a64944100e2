use std::fmt;

use ispapp_config::{keys, ConfigStore};
use serde::Deserialize;

use crate::error::ValidationError;

/// Server-issued token pair. Always stored and replaced as a unit.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Parse the JSON object carried in a `signup`/refresh response body.
    pub fn from_body(body: &str) -> Result<Self, String> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct TokenBody {
            access_token: String,
            refresh_token: String,
        }

        let parsed: TokenBody = serde_json::from_str(body).map_err(|err| err.to_string())?;
        if parsed.access_token.trim().is_empty() || parsed.refresh_token.trim().is_empty() {
            return Err("empty token in response body".into());
        }
        if [&parsed.access_token, &parsed.refresh_token]
            .iter()
            .any(|token| token.chars().any(char::is_control))
        {
            return Err("control character in token".into());
        }
        Ok(Self {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token,
        })
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Everything the device needs to talk to the backend.
///
/// `tokens` is `None` for an unregistered device; there is no way to hold
/// only one of the two tokens.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DeviceCredentials {
    pub login: String,
    pub domain: String,
    pub listener_port: Option<u16>,
    pub key: String,
    pub tokens: Option<TokenPair>,
}

impl DeviceCredentials {
    pub fn new(
        login: impl Into<String>,
        domain: impl Into<String>,
        listener_port: u16,
        key: impl Into<String>,
    ) -> Self {
        Self {
            login: login.into(),
            domain: domain.into(),
            listener_port: Some(listener_port),
            key: key.into(),
            tokens: None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.tokens.is_some()
    }

    pub fn with_tokens(mut self, tokens: TokenPair) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Fields a signup call cannot go without.
    pub fn validate_for_signup(&self) -> Result<(), ValidationError> {
        if self.domain.trim().is_empty() {
            return Err(ValidationError::MissingField(keys::DOMAIN));
        }
        match self.listener_port {
            None => return Err(ValidationError::MissingField(keys::LISTENER_PORT)),
            Some(0) => return Err(ValidationError::InvalidPort("0".into())),
            Some(_) => {}
        }
        if self.key.is_empty() {
            return Err(ValidationError::MissingField(keys::KEY));
        }
        Ok(())
    }

    pub async fn load(store: &dyn ConfigStore) -> Self {
        let login = store.get(keys::LOGIN).await.unwrap_or_default();
        let domain = store.get(keys::DOMAIN).await.unwrap_or_default();
        let key = store.get(keys::KEY).await.unwrap_or_default();
        let listener_port = match store.get(keys::LISTENER_PORT).await {
            Some(raw) if !raw.trim().is_empty() => match raw.trim().parse::<u16>() {
                Ok(port) => Some(port),
                Err(err) => {
                    tracing::warn!(
                        target: "ispapp::session",
                        value = %raw,
                        error = %err,
                        "ignoring unparseable listener port"
                    );
                    None
                }
            },
            _ => None,
        };

        let access = non_empty(store.get(keys::ACCESS_TOKEN).await);
        let refresh = non_empty(store.get(keys::REFRESH_TOKEN).await);
        let tokens = match (access, refresh) {
            (Some(access), Some(refresh)) => Some(TokenPair::new(access, refresh)),
            (None, None) => None,
            _ => {
                tracing::warn!(
                    target: "ispapp::session",
                    "only one token persisted; treating device as unregistered"
                );
                None
            }
        };

        Self {
            login,
            domain,
            listener_port,
            key,
            tokens,
        }
    }

    /// Stage every field into `store`. The caller decides when to commit.
    pub async fn stage(&self, store: &dyn ConfigStore) {
        store.set(keys::LOGIN, &self.login).await;
        store.set(keys::DOMAIN, &self.domain).await;
        if let Some(port) = self.listener_port {
            store.set(keys::LISTENER_PORT, &port.to_string()).await;
        }
        store.set(keys::KEY, &self.key).await;
        if let Some(tokens) = &self.tokens {
            stage_tokens(store, tokens).await;
        }
    }
}

pub async fn stage_tokens(store: &dyn ConfigStore, tokens: &TokenPair) {
    store.set(keys::ACCESS_TOKEN, &tokens.access_token).await;
    store.set(keys::REFRESH_TOKEN, &tokens.refresh_token).await;
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl fmt::Debug for DeviceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCredentials")
            .field("login", &self.login)
            .field("domain", &self.domain)
            .field("listener_port", &self.listener_port)
            .field("key", &if self.key.is_empty() { "" } else { "<redacted>" })
            .field("tokens", &self.tokens)
            .finish()
    }
}
