//! Configuration types for the mercury-client crate
//!
//! [`ClientOptions`] controls where the client connects, how long it waits
//! for replies, and whether the transport may reconnect on its own.

use std::time::Duration;

use mercury_transport::TransportOptions;
use url::Url;

use crate::error::{MercuryError, Result};

/// Production backend used when no host is configured
pub const DEFAULT_HOST: &str = "https://mercury.spruce.ai";

/// Reply and connection timeout used when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// URL schemes a transport can dial
pub const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "ws", "wss"];

/// Configuration for a [`MercuryClient`](crate::MercuryClient)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Absolute URL of the backend
    /// Default: `https://mercury.spruce.ai`
    pub host: String,

    /// Connection timeout and per-call reply timeout
    /// Default: 10 seconds
    pub timeout: Duration,

    /// Let the transport reconnect after a drop
    /// Default: true
    pub should_retry_connect: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            timeout: DEFAULT_TIMEOUT,
            should_retry_connect: true,
        }
    }
}

impl ClientOptions {
    /// Create options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the options, returning the parsed host.
    ///
    /// Performs no network activity.
    pub fn validate(&self) -> Result<Url> {
        if self.timeout.is_zero() {
            return Err(MercuryError::InvalidOptions(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        let url = Url::parse(&self.host).map_err(|e| MercuryError::InvalidHost {
            host: self.host.clone(),
            reason: e.to_string(),
        })?;

        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(MercuryError::InvalidHost {
                host: self.host.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }

        if url.host_str().map_or(true, str::is_empty) {
            return Err(MercuryError::InvalidHost {
                host: self.host.clone(),
                reason: "missing host".to_string(),
            });
        }

        Ok(url)
    }

    /// The settings handed to the transport factory
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            timeout: self.timeout,
            reconnection: self.should_retry_connect,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_connect(mut self, should_retry_connect: bool) -> Self {
        self.should_retry_connect = should_retry_connect;
        self
    }
}
