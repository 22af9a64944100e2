//! Persistent settings for the ISPApp device session.
//!
//! The session manager only talks to the [`ConfigStore`] trait. Production
//! wiring uses [`UciFileStore`] over `/etc/config/ispapp`; tests and early
//! wiring use [`InMemoryConfigStore`].

pub mod keys;
pub mod store;
pub mod uci;

pub use store::{ConfigStore, InMemoryConfigStore, StoreError};
pub use uci::{UciDocument, UciFileStore, UciSection};
