//! Z21 LAN command-station engine.
//!
//! The [`Engine`] turns client datagrams into hook calls on a [`Notifier`]
//! and fans station events back out to subscribed clients. Persistent
//! settings live behind a [`ConfigStore`]. The binary in this crate wraps the
//! engine in a UDP host.

pub mod engine;
pub mod notifier;
pub mod session;
pub mod store;

pub use engine::{Engine, SystemInfo};
pub use notifier::Notifier;
pub use session::{ClientId, Session, SessionTable, MAX_CLIENTS, SESSION_TTL};
pub use store::{ConfigStore, FileConfigStore, MemoryConfigStore, StoreError};
