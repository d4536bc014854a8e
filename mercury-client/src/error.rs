//! Error types for the mercury-client crate.

use std::fmt;
use std::time::Duration;

use mercury_transport::{AuthPayloadError, TransportError};
use serde_json::Value;

/// Handler-level errors reported by one responder.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponderError {
    /// The responder that reported the errors
    pub responder_ref: String,
    /// Errors exactly as the responder reported them
    pub errors: Vec<Value>,
}

impl fmt::Display for ResponderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.responder_ref)?;
        for (index, error) in self.errors.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            match error.get("message").and_then(Value::as_str) {
                Some(message) => f.write_str(message)?,
                None => write!(f, "{error}")?,
            }
        }
        Ok(())
    }
}

/// Errors that can occur while talking to the backend.
#[derive(Debug, thiserror::Error)]
pub enum MercuryError {
    /// The host is malformed or uses an unsupported scheme; no connection was attempted
    #[error("Invalid host {host:?}: {reason}")]
    InvalidHost {
        /// The host as configured
        host: String,
        /// Why it was rejected
        reason: String,
    },

    /// Options other than the host are unusable
    #[error("Invalid client options: {0}")]
    InvalidOptions(String),

    /// The operation needs an established connection
    #[error("Client is not connected")]
    NotConnected,

    /// No reply arrived within the configured timeout
    #[error("Timed out after {timeout:?} waiting on {event}")]
    Timeout {
        /// The event (or `connect`) being waited on
        event: String,
        /// The configured timeout
        timeout: Duration,
    },

    /// Nothing on either side is able to answer the event
    #[error("No listener registered for event {event}")]
    NoListener {
        /// The emitted event
        event: String,
    },

    /// One or more responders reported handler-level errors
    #[error("{} of {total_responses} responder(s) to {event} reported errors", .errors.len())]
    AggregatedHandlerError {
        /// The emitted event
        event: String,
        /// How many handler registrations matched the event
        total_contracts: usize,
        /// How many responders answered in total
        total_responses: usize,
        /// Per-responder error detail, in backend order
        errors: Vec<ResponderError>,
    },

    /// The backend refused the supplied credentials
    #[error("Authentication rejected by {} responder(s)", .errors.len())]
    AuthenticationRejected {
        /// Per-responder error detail
        errors: Vec<ResponderError>,
    },

    /// The credentials do not form a valid identity assertion
    #[error("Invalid authentication payload: {0}")]
    InvalidAuthPayload(#[from] AuthPayloadError),

    /// The backend refused the event without aggregating responders
    #[error("Backend rejected {event}: {reason}")]
    Rejected {
        /// The emitted event
        event: String,
        /// The backend's reason
        reason: String,
    },

    /// The aggregate reply violates its own bookkeeping
    #[error("Invalid response to {event}: {reason}")]
    InvalidResponse {
        /// The emitted event
        event: String,
        /// What was inconsistent
        reason: String,
    },

    /// An error occurred in the transport
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The blocking facade could not start its runtime
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl MercuryError {
    /// Per-responder detail for handler and authentication failures
    pub fn responder_errors(&self) -> Option<&[ResponderError]> {
        match self {
            Self::AggregatedHandlerError { errors, .. } | Self::AuthenticationRejected { errors } => {
                Some(errors)
            }
            _ => None,
        }
    }

    /// Whether the error is a reply timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Convenience type alias for Results using MercuryError.
pub type Result<T> = std::result::Result<T, MercuryError>;
