//! The duplex transport contract consumed by the client core.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;

use crate::error::{ReplyError, TransportError};
use crate::types::{AggregateResponse, SingleResponse, TargetAndPayload};

/// Ties one outgoing frame to the single reply it expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "corr-{}", self.0)
    }
}

/// Settings a transport applies when dialling the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// Connection establishment timeout
    pub timeout: Duration,
    /// Whether the transport should reconnect on its own after a drop
    pub reconnection: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            reconnection: true,
        }
    }
}

/// A frame written by the client
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// Emit an event; exactly one [`TransportEvent::Reply`] is expected back
    Emit {
        /// Id the reply will carry
        correlation_id: CorrelationId,
        /// Fully-qualified event name, passed through verbatim
        event: String,
        /// Target and payload
        body: TargetAndPayload,
    },
    /// Answer a [`TransportEvent::Request`] routed to this client
    Respond {
        /// Id taken from the request
        correlation_id: CorrelationId,
        /// This client's contribution to the emitter's aggregate
        response: SingleResponse,
    },
}

impl OutboundFrame {
    /// The correlation id carried by the frame
    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            Self::Emit { correlation_id, .. } | Self::Respond { correlation_id, .. } => {
                *correlation_id
            }
        }
    }

    /// The emitted event name, if this is an emit
    pub fn event(&self) -> Option<&str> {
        match self {
            Self::Emit { event, .. } => Some(event),
            Self::Respond { .. } => None,
        }
    }
}

/// What the backend sent back for one emit
pub type ReplyOutcome = Result<AggregateResponse, ReplyError>;

/// Notifications pushed by a transport into the client's inbound channel
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The aggregate reply to an earlier [`OutboundFrame::Emit`]
    Reply {
        /// Id of the emit being answered
        correlation_id: CorrelationId,
        /// Aggregate reply or backend refusal
        outcome: ReplyOutcome,
    },
    /// The backend routed an event to this connection
    Request {
        /// Id to answer with
        correlation_id: CorrelationId,
        /// Fully-qualified event name
        event: String,
        /// Target and payload as sent by the emitter
        body: TargetAndPayload,
    },
    /// Connectivity was lost
    Dropped {
        /// Transport-specific description
        reason: String,
    },
    /// Connectivity was restored after a drop
    Reconnected,
}

/// Sending half of the inbound channel handed to a transport
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half of the inbound channel, owned by the client
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Create the inbound channel used between a transport and the client
pub fn event_channel() -> (TransportEventSender, TransportEventReceiver) {
    mpsc::unbounded_channel()
}

/// An established duplex connection to the backend.
///
/// Implementations deliver everything they receive through the
/// [`TransportEventSender`] given to [`TransportFactory::connect`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// The host this transport was dialled with
    fn host(&self) -> &Url;

    /// Live connectivity; never a cached value from before a drop
    fn is_connected(&self) -> bool;

    /// Write one frame to the backend
    async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError>;

    /// Tear the connection down. Idempotent.
    fn disconnect(&self);
}

/// Creates transports; injected into the client so tests can substitute fakes.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Dial `host`, returning once the connection is established
    async fn connect(
        &self,
        host: &Url,
        options: TransportOptions,
        events: TransportEventSender,
    ) -> Result<Arc<dyn Transport>, TransportError>;
}
