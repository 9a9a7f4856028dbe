//! Unified error types for the relay.

use thiserror::Error;

/// Unified Result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the relay and the extension-side agent.
///
/// Variants map onto the error taxonomy clients see in `{error:{message}}`
/// response frames (see `Error::client_message`); `kind()` returns the
/// stable string clients can match on.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors (listener bind, socket, file serving).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Address parsing errors (host:port configuration).
    #[error("Network error: {0}")]
    Net(#[from] std::net::AddrParseError),

    /// WebSocket transport errors.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// No extension link is currently connected.
    #[error("Extension not connected")]
    NoExtension,

    /// The extension link dropped while a call was outstanding.
    #[error("extension disconnected")]
    ExtensionDisconnected,

    /// A send was attempted while the link exists but is not open.
    #[error("link not connected")]
    LinkNotConnected,

    /// A pending call's deadline elapsed before a response arrived.
    #[error("upstream call timed out: {0}")]
    UpstreamTimeout(String),

    /// The extension responded with a non-empty `error` string.
    #[error("{0}")]
    UpstreamError(String),

    /// The router could not resolve a target-id or session-id.
    #[error("unknown target: {0}")]
    UnknownTarget(String),

    /// A required parameter was missing or malformed.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Frame failed to parse as JSON; caller should drop it silently.
    #[error("parse error: {0}")]
    ParseError(String),

    /// The requesting peer disconnected mid-call.
    #[error("peer gone")]
    PeerGone,

    /// Serialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error that should not normally surface to a peer.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new WebSocket error.
    pub fn websocket<S: Into<String>>(msg: S) -> Self {
        Error::WebSocket(msg.into())
    }

    /// Create a new upstream-timeout error.
    pub fn upstream_timeout<S: Into<String>>(msg: S) -> Self {
        Error::UpstreamTimeout(msg.into())
    }

    /// Create a new upstream-error (extension reported a failure).
    pub fn upstream_error<S: Into<String>>(msg: S) -> Self {
        Error::UpstreamError(msg.into())
    }

    /// Create a new unknown-target error.
    pub fn unknown_target<S: Into<String>>(id: S) -> Self {
        Error::UnknownTarget(id.into())
    }

    /// Create a new invalid-params error.
    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        Error::InvalidParams(msg.into())
    }

    /// Create a new configuration error.
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Error::Configuration(msg.into())
    }

    /// Create a new internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Stable error kind string clients can match on.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NoExtension => "no-extension",
            Error::ExtensionDisconnected => "extension-disconnected",
            Error::LinkNotConnected => "link-not-connected",
            Error::UpstreamTimeout(_) => "upstream-timeout",
            Error::UpstreamError(_) => "upstream-error",
            Error::UnknownTarget(_) => "unknown-target",
            Error::InvalidParams(_) => "invalid-params",
            Error::ParseError(_) => "parse-error",
            Error::PeerGone => "peer-gone",
            _ => "internal",
        }
    }

    /// Message to place in a `{error:{message}}` response frame.
    pub fn client_message(&self) -> String {
        self.to_string()
    }
}
