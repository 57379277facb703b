//! Crate-wide error types
//!
//! Failures fall into three terminal categories: authentication rejections,
//! connectivity failures (device unreachable, connect timeout, login
//! rejected, connection lost) and query failures (device reachable but the
//! command itself errored). Nothing is retried; every failure ends the
//! single request or attempt that produced it.

use thiserror::Error;

/// Result alias using the crate error type
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Device communication failed
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// I/O error outside device communication (bind, accept)
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Configuration loading errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is not set
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    /// An environment variable is set but unparseable
    #[error("invalid value for environment variable {0}")]
    Invalid(&'static str),
}

/// Errors from RouterOS device communication
#[derive(Debug, Error)]
pub enum DeviceError {
    /// TCP connection could not be established
    #[error("connection to {host} failed: {source}")]
    Connect {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// TCP connection attempt exceeded the configured timeout
    #[error("connection to {host} timed out")]
    Timeout { host: String },

    /// Device rejected the login credentials
    #[error("login rejected: {0}")]
    Login(String),

    /// Command returned a `!trap` reply
    #[error("device returned an error: {0}")]
    Trap(String),

    /// Device sent a `!fatal` reply and closed the connection
    #[error("device closed the connection: {0}")]
    Fatal(String),

    /// Reply did not follow the API protocol
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Connection is closed
    #[error("connection closed")]
    Closed,

    /// Socket-level I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    /// Whether this error means the device could not be reached (as opposed
    /// to the device being reachable but the command failing).
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            DeviceError::Connect { .. }
                | DeviceError::Timeout { .. }
                | DeviceError::Login(_)
                | DeviceError::Fatal(_)
                | DeviceError::Closed
                | DeviceError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert!(DeviceError::Timeout {
            host: "10.0.0.1".into()
        }
        .is_connectivity());
        assert!(DeviceError::Closed.is_connectivity());
        assert!(DeviceError::Login("bad credentials".into()).is_connectivity());

        assert!(!DeviceError::Trap("no such item".into()).is_connectivity());
        assert!(!DeviceError::Protocol("unexpected word".into()).is_connectivity());
    }

    #[test]
    fn test_error_messages() {
        let err = DeviceError::Timeout {
            host: "10.0.0.1".into(),
        };
        assert_eq!(err.to_string(), "connection to 10.0.0.1 timed out");

        let err = ConfigError::Missing("TOKEN");
        assert_eq!(
            err.to_string(),
            "missing required environment variable TOKEN"
        );
    }
}
