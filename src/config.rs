//! Process configuration
//!
//! All configuration comes from the environment; there are no config files
//! and no persisted state. The secrets (`TOKEN`, `AUTH_TOKEN`) and device
//! credentials (`API_USER`, `API_PASSWORD`) are required; everything else
//! has a default.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default HTTP/WebSocket listen port
pub const DEFAULT_PORT: u16 = 3000;

/// Default RouterOS API port
pub const DEFAULT_DEVICE_PORT: u16 = 8728;

/// Default device connect timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP/WebSocket listen port (`PORT`)
    pub port: u16,

    /// Shared secret checked during the WebSocket handshake (`TOKEN`)
    pub stream_token: String,

    /// Shared secret checked against the `Authorization` header (`AUTH_TOKEN`)
    pub http_token: String,

    /// RouterOS API username (`API_USER`)
    pub api_user: String,

    /// RouterOS API password (`API_PASSWORD`)
    pub api_password: String,

    /// RouterOS API port (`DEVICE_PORT`)
    pub device_port: u16,

    /// Device connect timeout (`CONNECT_TIMEOUT_SECS`)
    pub connect_timeout: Duration,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary lookup function.
    ///
    /// `from_env` delegates here; tests inject their own lookup instead of
    /// mutating the process environment.
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            port: parse_or(&lookup, "PORT", DEFAULT_PORT)?,
            stream_token: require(&lookup, "TOKEN")?,
            http_token: require(&lookup, "AUTH_TOKEN")?,
            api_user: require(&lookup, "API_USER")?,
            api_password: require(&lookup, "API_PASSWORD")?,
            device_port: parse_or(&lookup, "DEVICE_PORT", DEFAULT_DEVICE_PORT)?,
            connect_timeout: Duration::from_secs(parse_or(
                &lookup,
                "CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?),
        })
    }

    /// Address the server binds to (all interfaces, configured port).
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}

fn require<F>(lookup: &F, name: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn parse_or<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid(name)),
        None => Ok(default),
    }
}
