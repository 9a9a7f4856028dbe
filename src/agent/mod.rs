//! The extension-side agent: modeled in-crate behind the
//! [`debugger::DebuggerApi`] trait seam, since the real counterpart is a
//! browser extension's JS host and out of this crate's reach. A
//! [`link::run`] implementation dials the relay over WebSocket for
//! production use; [`debugger::MockDebugger`] stands in for the browser
//! in tests.

pub mod agent;
pub mod debugger;
pub mod link;
pub mod state;

pub use agent::ExtensionAgent;
pub use debugger::{DebuggerApi, MockDebugger};
