//! Error types for the transport layer.

/// Errors raised by a [`Transport`](crate::Transport) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be established
    #[error("Failed to connect to {host}: {reason}")]
    ConnectFailed {
        /// The host that was dialled
        host: String,
        /// Transport-specific failure description
        reason: String,
    },

    /// A frame could not be written to the channel
    #[error("Failed to send frame: {0}")]
    SendFailed(String),

    /// The transport has been shut down
    #[error("Transport is closed")]
    Closed,
}

/// Backend-level refusal carried by a reply instead of an aggregate response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplyError {
    /// Nothing on the backend side is able to answer the event
    #[error("No listener registered for event {event}")]
    NoListener {
        /// The event name as it was emitted
        event: String,
    },

    /// Any other refusal reported by the backend
    #[error("Backend rejected the event: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let error = TransportError::ConnectFailed {
            host: "https://mercury.example".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to connect to https://mercury.example: connection refused"
        );

        assert_eq!(
            TransportError::SendFailed("broken pipe".to_string()).to_string(),
            "Failed to send frame: broken pipe"
        );
        assert_eq!(TransportError::Closed.to_string(), "Transport is closed");
    }

    #[test]
    fn test_reply_error_display() {
        let error = ReplyError::NoListener {
            event: "unknown::v1".to_string(),
        };
        assert_eq!(error.to_string(), "No listener registered for event unknown::v1");

        let error = ReplyError::Rejected("invalid contract".to_string());
        assert_eq!(error.to_string(), "Backend rejected the event: invalid contract");
    }
}
