//! Configuration management for the relay.

use crate::{Error, Result};
use serde::Deserialize;
use std::env;

/// Macro for parsing environment variables with type safety and consistent error handling.
macro_rules! parse_env_var {
    ($config:ident, $field:ident, $env_var:expr, $ty:ty) => {
        if let Ok(value) = env::var($env_var) {
            $config.$field = value
                .parse::<$ty>()
                .map_err(|_| Error::configuration(concat!("Invalid ", $env_var)))?;
        }
    };

    ($config:ident, $field:ident, $env_var:expr) => {
        if let Ok(value) = env::var($env_var) {
            $config.$field = value;
        }
    };

    (opt $config:ident, $field:ident, $env_var:expr) => {
        if let Ok(value) = env::var($env_var) {
            $config.$field = Some(value);
        }
    };
}

/// Relay configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Host address to bind to. Must resolve to a loopback address; the
    /// transport still checks every peer's remote address regardless.
    pub host: String,

    /// Port to listen on.
    pub port: u16,

    /// Directory screenshots are served from (relay-private, `/screenshots/<file>`).
    pub screenshot_dir: String,

    /// Default timeout for a forwarded CDP call, in seconds.
    pub default_timeout_secs: u64,

    /// Timeout for the `openAndAttach` compound operation, in seconds.
    pub open_and_attach_timeout_secs: u64,

    /// Timeout for `waitForTabLoad` polling, in seconds.
    pub wait_for_tab_load_timeout_secs: u64,

    /// Interval between extension-link pings, in seconds.
    pub ping_interval_secs: u64,

    /// Maximum accepted HTTP body size, in bytes.
    pub max_body_bytes: usize,

    /// Maximum accepted HTTP header size, in bytes.
    pub max_header_bytes: usize,

    /// Log level.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 18792,
            screenshot_dir: "./screenshots".to_string(),
            default_timeout_secs: 30,
            open_and_attach_timeout_secs: 60,
            wait_for_tab_load_timeout_secs: 30,
            ping_interval_secs: 5,
            max_body_bytes: 16 * 1024 * 1024,
            max_header_bytes: 64 * 1024,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        parse_env_var!(config, host, "CDP_RELAY_HOST");
        parse_env_var!(config, port, "CDP_RELAY_PORT", u16);
        parse_env_var!(config, screenshot_dir, "CDP_RELAY_SCREENSHOT_DIR");
        parse_env_var!(
            config,
            default_timeout_secs,
            "CDP_RELAY_DEFAULT_TIMEOUT_SECS",
            u64
        );
        parse_env_var!(
            config,
            open_and_attach_timeout_secs,
            "CDP_RELAY_OPEN_AND_ATTACH_TIMEOUT_SECS",
            u64
        );
        parse_env_var!(
            config,
            wait_for_tab_load_timeout_secs,
            "CDP_RELAY_WAIT_FOR_TAB_LOAD_TIMEOUT_SECS",
            u64
        );
        parse_env_var!(config, ping_interval_secs, "CDP_RELAY_PING_INTERVAL_SECS", u64);
        parse_env_var!(config, max_body_bytes, "CDP_RELAY_MAX_BODY_BYTES", usize);
        parse_env_var!(config, max_header_bytes, "CDP_RELAY_MAX_HEADER_BYTES", usize);
        parse_env_var!(config, log_level, "CDP_RELAY_LOG_LEVEL");

        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::configuration(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::configuration(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// The bound socket address as a string, e.g. `127.0.0.1:18792`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
