//! Client side of the ISPApp device registration handshake.
//!
//! [`SessionManager`] owns the connection state and token lifecycle of one
//! device, writing credentials through an [`ispapp_config::ConfigStore`] and
//! reaching the backend through a [`transport::Transport`]. [`StatusPoller`]
//! drives periodic connectivity checks on top of it, and [`Service`] wires
//! both to the settings file and the ubus endpoint.

pub mod config;
pub mod credentials;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod poller;
pub mod service;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use config::{PollingConfig, SessionConfig};
pub use credentials::{DeviceCredentials, TokenPair};
pub use error::{AuthError, RefreshError, SignupError, TransportError, ValidationError};
pub use identity::{DeviceIdentity, HardwareIdentity};
pub use poller::{PollerHandle, PollerStats, StatusPoller};
pub use service::{Service, StartupError};
pub use session::{AuthPath, ConnectionState, SessionManager, SessionStatus, StatusDisplay};
