//! Wire data model and transport contract for the Mercury event-bus client.
//!
//! This crate is the thin layer that sits between the client core and whatever
//! duplex channel actually talks to the backend. It has no knowledge of
//! listeners, authentication, or connection lifecycle.
//!
//! # Overview
//!
//! - [`TargetAndPayload`], [`SingleResponse`], [`AggregateResponse`] and
//!   [`AuthenticatePayload`]: the structured values exchanged with the backend.
//! - [`Transport`] and [`TransportFactory`]: the contract a concrete transport
//!   implements. Outgoing traffic goes through [`Transport::send`]; everything
//!   coming back is pushed as a [`TransportEvent`] into the channel handed to
//!   [`TransportFactory::connect`].
//! - [`fqen`]: helpers for the `<name>::v<version>` naming convention and the
//!   reserved backend event names.
//!
//! # Example: Implementing a Transport
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use mercury_transport::{
//!     OutboundFrame, Transport, TransportError, TransportEventSender, TransportFactory,
//!     TransportOptions,
//! };
//! use url::Url;
//!
//! struct LoopbackTransport {
//!     host: Url,
//!     events: TransportEventSender,
//! }
//!
//! #[async_trait]
//! impl Transport for LoopbackTransport {
//!     fn host(&self) -> &Url {
//!         &self.host
//!     }
//!
//!     fn is_connected(&self) -> bool {
//!         !self.events.is_closed()
//!     }
//!
//!     async fn send(&self, _frame: OutboundFrame) -> Result<(), TransportError> {
//!         Ok(())
//!     }
//!
//!     fn disconnect(&self) {}
//! }
//!
//! struct LoopbackFactory;
//!
//! #[async_trait]
//! impl TransportFactory for LoopbackFactory {
//!     async fn connect(
//!         &self,
//!         host: &Url,
//!         _options: TransportOptions,
//!         events: TransportEventSender,
//!     ) -> Result<Arc<dyn Transport>, TransportError> {
//!         Ok(Arc::new(LoopbackTransport { host: host.clone(), events }))
//!     }
//! }
//! ```

mod error;
pub mod fqen;
mod transport;
mod types;

pub use error::{ReplyError, TransportError};
pub use fqen::EventName;
pub use transport::{
    event_channel, CorrelationId, OutboundFrame, ReplyOutcome, Transport, TransportEvent,
    TransportEventReceiver, TransportEventSender, TransportFactory, TransportOptions,
};
pub use types::{
    fake_responder_ref, AggregateResponse, AuthPayloadError, AuthenticatePayload, JsonMap,
    ResponsePayload, SingleResponse, TargetAndPayload,
};
