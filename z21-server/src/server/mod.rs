//! UDP host around the engine.

pub mod clients;
pub mod host;
pub mod listener;

pub use host::VirtualStation;
pub use listener::{Server, ServerConfig};
