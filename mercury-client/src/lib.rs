//! # Mercury Client
//!
//! Client core for the Mercury event bus: emit events to every connected
//! responder, answer events routed to this client, and keep a session alive
//! across transport reconnects.
//!
//! ## Overview
//!
//! - **Scatter-gather emission**: [`MercuryClient::emit`] sends one event and
//!   waits for the aggregate reply, returning every responder's payload in the
//!   order the backend reported them.
//! - **Listeners**: [`MercuryClient::on`] registers this client's handler for an
//!   event. One handler per event name; registering again replaces it.
//! - **Sessions**: [`MercuryClient::authenticate`] asserts an identity. Accepted
//!   credentials and all listeners are replayed automatically after a reconnect.
//! - **Blocking facade**: [`blocking::MercuryClient`] offers the same operations
//!   without async/await.
//!
//! The client talks to the backend through a
//! [`TransportFactory`](mercury_transport::TransportFactory), which keeps the
//! wire protocol out of this crate and lets tests substitute an in-memory
//! backend.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mercury_client::prelude::*;
//! use serde_json::json;
//!
//! let client = MercuryClient::builder()
//!     .host("https://mercury.spruce.ai")
//!     .transport_factory(factory)
//!     .connect()
//!     .await?;
//!
//! client.authenticate(AuthenticatePayload::token(token)?).await?;
//!
//! client
//!     .on("did-message::v1", |body| Ok(json!({ "seen": body.payload })))
//!     .await?;
//!
//! let body = TargetAndPayload::new().with_payload(payload);
//! for response in client.emit("send-message::v1", body).await? {
//!     println!("{:?}", response);
//! }
//!
//! client.disconnect();
//! ```
//!
//! ## Errors
//!
//! Every emit either returns a non-empty list of payloads or a
//! [`MercuryError`]. Nobody answering is [`MercuryError::NoListener`], and
//! handler failures surface as [`MercuryError::AggregatedHandlerError`] with
//! the full per-responder detail.

pub mod auth;
pub mod blocking;
pub mod client;
pub mod config;
pub mod correlator;
mod dispatcher;
pub mod error;
pub mod logging;
pub mod registry;

pub use client::{ConnectionState, MercuryClient, MercuryClientBuilder};
pub use config::ClientOptions;
pub use dispatcher::LISTENER_PANICKED;
pub use error::{MercuryError, ResponderError, Result};
pub use registry::{Listener, ListenerError, ListenerRegistry, ListenerResult};

// Re-export the wire types callers need for every call
pub use mercury_transport::{
    fqen, AggregateResponse, AuthenticatePayload, EventName, JsonMap, ResponsePayload,
    SingleResponse, TargetAndPayload, TransportFactory,
};

/// Commonly used types
pub mod prelude {
    pub use crate::client::{ConnectionState, MercuryClient};
    pub use crate::config::ClientOptions;
    pub use crate::error::{MercuryError, Result};
    pub use crate::registry::{ListenerError, ListenerResult};
    pub use mercury_transport::{
        fqen, AuthenticatePayload, ResponsePayload, TargetAndPayload, TransportFactory,
    };
}
