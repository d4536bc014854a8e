//! Blocking client
//!
//! Wraps the async [`MercuryClient`](crate::MercuryClient) in a dedicated
//! tokio runtime so it can be used from plain synchronous code. Every method
//! blocks the calling thread.
//!
//! Do not call these methods from inside an async context; use the async
//! client there instead.

use std::sync::Arc;

use mercury_transport::{AuthenticatePayload, ResponsePayload, TargetAndPayload, TransportFactory};
use tokio::runtime::Runtime;

use crate::client::{ConnectionState, MercuryClient as AsyncClient};
use crate::config::ClientOptions;
use crate::error::{MercuryError, Result};
use crate::registry::ListenerResult;

/// Sync-first Mercury client
///
/// # Example
///
/// ```rust,ignore
/// use mercury_client::blocking::MercuryClient;
/// use mercury_client::ClientOptions;
///
/// // No .await anywhere
/// let client = MercuryClient::connect(ClientOptions::default(), factory)?;
/// client.on("ping::v1", |_| Ok(serde_json::json!({ "pong": true })))?;
/// let payloads = client.emit("ping::v1", None)?;
/// ```
pub struct MercuryClient {
    inner: AsyncClient,

    /// Drives the connection, the inbound event loop and listener tasks
    runtime: Runtime,
}

impl MercuryClient {
    /// Connect on a freshly created runtime
    pub fn connect(options: ClientOptions, factory: Arc<dyn TransportFactory>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("mercury-client")
            .enable_all()
            .build()
            .map_err(|e| {
                tracing::error!("Failed to create tokio runtime for client: {}", e);
                MercuryError::Runtime(e.to_string())
            })?;

        let inner = runtime.block_on(AsyncClient::connect(options, factory))?;
        Ok(Self { inner, runtime })
    }

    pub fn emit(
        &self,
        event: &str,
        body: impl Into<Option<TargetAndPayload>>,
    ) -> Result<Vec<ResponsePayload>> {
        self.runtime.block_on(self.inner.emit(event, body))
    }

    /// Register `handler` as this client's answer to `event`.
    ///
    /// The handler runs on this client's runtime, on its blocking pool. It must
    /// not call back into this blocking client (`emit`, `off` and so on): that
    /// would start a runtime from within a runtime and panic.
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(TargetAndPayload) -> ListenerResult + Send + Sync + 'static,
    {
        self.runtime.block_on(self.inner.on(event, handler))
    }

    pub fn off(&self, event: &str) -> Result<()> {
        self.runtime.block_on(self.inner.off(event))
    }

    pub fn authenticate(&self, payload: AuthenticatePayload) -> Result<ResponsePayload> {
        self.runtime.block_on(self.inner.authenticate(payload))
    }

    pub fn whoami(&self) -> Result<ResponsePayload> {
        self.runtime.block_on(self.inner.whoami())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Tear down the connection. Idempotent.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// The async client driven by this wrapper
    pub fn as_async(&self) -> &AsyncClient {
        &self.inner
    }
}

impl Drop for MercuryClient {
    fn drop(&mut self) {
        self.inner.disconnect();
    }
}
