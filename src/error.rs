//! Error types for the dnssd-mux library

use std::{io, sync::Arc};
use thiserror::Error;

/// The primary error type for the dnssd-mux crate
///
/// The type is `Clone` because a single terminal failure is delivered to
/// every subscriber of the active discovery period.
#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    /// Invalid configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Invalid data error
    #[error("Invalid data: {0}")]
    InvalidData(String),
    /// Invalid service record error
    #[error("Invalid service record ({field}): {reason}")]
    InvalidServiceRecord {
        /// The field that contains invalid data
        field: String,
        /// The reason why the field is invalid
        reason: String,
    },
    /// No service was found before the stream ended
    #[error("Service not found: {0}")]
    ServiceNotFound(String),
    /// Failure reported by the discovery provider
    #[error("Provider error: {0}")]
    Provider(String),
    /// mDNS daemon error
    #[error("mDNS error: {0}")]
    Mdns(String),
    /// Caller-facing timeout elapsed
    #[error("Timeout: {0}")]
    Timeout(String),
    /// A different query is already being browsed by the session
    #[error("Session is browsing {active}, cannot attach to {requested}")]
    QueryMismatch {
        /// Query of the active period
        active: String,
        /// Query the caller asked for
        requested: String,
    },
    /// I/O error
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
    /// Other error types
    #[error("Error: {0}")]
    Other(String),
}

impl From<io::Error> for DiscoveryError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<envconfig::Error> for DiscoveryError {
    fn from(err: envconfig::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[cfg(feature = "mdns-sd")]
impl From<mdns_sd::Error> for DiscoveryError {
    fn from(err: mdns_sd::Error) -> Self {
        Self::Mdns(err.to_string())
    }
}

/// Common result type for library operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

impl DiscoveryError {
    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new invalid data error
    pub fn invalid_data<S: Into<String>>(msg: S) -> Self {
        Self::InvalidData(msg.into())
    }

    /// Create a new invalid service record error
    pub fn invalid_record<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Self::InvalidServiceRecord {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a new service not found error
    pub fn service_not_found<S: Into<String>>(msg: S) -> Self {
        Self::ServiceNotFound(msg.into())
    }

    /// Create a new provider error
    pub fn provider<S: Into<String>>(msg: S) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a new mDNS error
    pub fn mdns<S: Into<String>>(msg: S) -> Self {
        Self::Mdns(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a new other error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}
