//! Test support for Mercury clients.
//!
//! [`FakeBackend`] is an in-memory server. Connect any number of clients to it
//! through [`FakeBackend::factory`]; events emitted by one client are routed to
//! every connected client that registered a listener, and the answers come
//! back as one aggregate reply. Each [`FakeTransport`] can be dropped and
//! reconnected on demand to exercise session replay.
//!
//! ```rust,ignore
//! use mercury_client::{ClientOptions, MercuryClient};
//! use mercury_testkit::FakeBackend;
//!
//! let backend = FakeBackend::new();
//! let client = MercuryClient::connect(ClientOptions::default(), backend.factory()).await?;
//!
//! backend.last_connection().unwrap().simulate_drop();
//! ```

mod fake;
mod helpers;

pub use fake::{
    BackendHandler, FakeBackend, FakeTransport, INVALID_AUTH_TOKEN, INVALID_PAYLOAD,
    RESPONDER_TIMEOUT,
};
pub use helpers::{build_aggregate_response, generate_random_id, json_map};
