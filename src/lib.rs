//! cdp-relay: a loopback Chrome DevTools Protocol relay bridging CDP
//! clients to an extension-owned debugger session.

pub mod agent;
pub mod client_pool;
pub mod config;
pub mod error;
pub mod extension_link;
pub mod http;
pub mod pending;
pub mod registry;
pub mod router;
pub mod server;
pub mod wire;

pub use error::{Error, Result};

/// Crate version, surfaced in the DevTools discovery payload.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
