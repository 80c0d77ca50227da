//! Error types for Udprelay
//!
//! This module defines the error type surfaced by the relay engine.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Main error type for relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The listening socket could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind
        addr: String,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// The upstream address could not be resolved
    #[error("Failed to resolve upstream {target}: {reason}")]
    Resolve {
        /// `host:port` that failed to resolve
        target: String,
        /// Resolver failure description
        reason: String,
    },

    /// `start` was called on a relay that is already running
    #[error("Relay already started on {0}")]
    AlreadyStarted(SocketAddr),

    /// The relay has been closed and cannot be restarted
    #[error("Relay is closed")]
    Closed,
}

impl RelayError {
    /// Whether this error happened before any background task was spawned
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            RelayError::Bind { .. } | RelayError::Resolve { .. } | RelayError::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_error_display() {
        let err = RelayError::Config("invalid config".to_string());
        assert_eq!(format!("{}", err), "Configuration error: invalid config");

        let err = RelayError::Bind {
            addr: "0.0.0.0:9999".to_string(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(format!("{}", err), "Failed to bind 0.0.0.0:9999: in use");

        let err = RelayError::Resolve {
            target: "upstream.invalid:53".to_string(),
            reason: "no addresses".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "Failed to resolve upstream upstream.invalid:53: no addresses"
        );

        let err = RelayError::AlreadyStarted("127.0.0.1:9999".parse().unwrap());
        assert_eq!(format!("{}", err), "Relay already started on 127.0.0.1:9999");

        assert_eq!(format!("{}", RelayError::Closed), "Relay is closed");
    }

    #[test]
    fn test_relay_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::Other, "io error");
        let err: RelayError = io_err.into();
        assert!(matches!(err, RelayError::Io(_)));
    }

    #[test]
    fn test_bind_error_keeps_source() {
        use std::error::Error as _;

        let err = RelayError::Bind {
            addr: "127.0.0.1:1".to_string(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "denied");
    }

    #[test]
    fn test_is_startup_failure() {
        assert!(RelayError::Config("x".into()).is_startup_failure());
        assert!(RelayError::Resolve {
            target: "a:1".into(),
            reason: "b".into()
        }
        .is_startup_failure());
        assert!(!RelayError::Closed.is_startup_failure());
        assert!(!RelayError::AlreadyStarted("127.0.0.1:1".parse().unwrap()).is_startup_failure());
    }
}
