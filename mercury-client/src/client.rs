//! The async Mercury client
//!
//! [`MercuryClient`] owns one transport connection, the listener registry, the
//! remembered credentials and the table of in-flight emits. Handles are cheap
//! to clone and share the same connection.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mercury_transport::{
    event_channel, fqen, AggregateResponse, AuthenticatePayload, JsonMap, ResponsePayload,
    TargetAndPayload, Transport, TransportFactory,
};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::auth::{self, AuthManager};
use crate::config::ClientOptions;
use crate::correlator::{check_aggregate, round_trip, Correlator};
use crate::dispatcher;
use crate::error::{MercuryError, Result};
use crate::registry::{ListenerRegistry, ListenerResult};

/// Upper bound on one wait for a state change while a call waits for the
/// transport to come back
const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lifecycle of a client's connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Explicitly disconnected, or the connection was lost with retry disabled
    Disconnected,
    /// The initial connection is being established
    Connecting,
    /// Connected, with credentials and listeners in place
    Connected,
    /// The transport dropped and is expected to come back
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Async client for a Mercury event bus
///
/// # Example
///
/// ```rust,ignore
/// use mercury_client::{ClientOptions, MercuryClient};
///
/// let client = MercuryClient::connect(ClientOptions::default(), factory).await?;
///
/// client
///     .on("did-book-appointment::v1", |body| {
///         Ok(serde_json::json!({ "received": body.payload }))
///     })
///     .await?;
///
/// let payloads = client.emit("whoami::v2020_12_25", None).await?;
/// ```
#[derive(Clone)]
pub struct MercuryClient {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    options: ClientOptions,

    /// Responder reference used when answering routed events
    client_id: String,

    transport: RwLock<Option<Arc<dyn Transport>>>,
    pub(crate) registry: ListenerRegistry,
    auth: AuthManager,
    pub(crate) correlator: Correlator,
    state: watch::Sender<ConnectionState>,

    /// Bumped on every reported drop; a replay only restores the connection it started on
    drops: AtomicU64,

    /// Serializes listener syncs so the backend always holds the latest set
    registration_sync: tokio::sync::Mutex<()>,

    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl MercuryClient {
    /// Start building a client with fluent configuration
    pub fn builder() -> MercuryClientBuilder {
        MercuryClientBuilder::new()
    }

    /// Validate `options` and connect through `factory`.
    ///
    /// Malformed hosts fail with [`MercuryError::InvalidHost`] before the
    /// factory is touched.
    pub async fn connect(
        options: ClientOptions,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<Self> {
        let host = options.validate()?;
        tracing::info!("Connecting to {}", host);

        let (events_tx, events_rx) = event_channel();
        let connecting = factory.connect(&host, options.transport_options(), events_tx);
        let transport = match tokio::time::timeout(options.timeout, connecting).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(MercuryError::Timeout {
                    event: "connect".to_string(),
                    timeout: options.timeout,
                })
            }
        };

        let (state, _) = watch::channel(ConnectionState::Connecting);
        let inner = Arc::new(ClientInner {
            options,
            client_id: format!("client-{}", Uuid::new_v4()),
            transport: RwLock::new(Some(transport)),
            registry: ListenerRegistry::new(),
            auth: AuthManager::new(),
            correlator: Correlator::new(),
            state,
            drops: AtomicU64::new(0),
            registration_sync: tokio::sync::Mutex::new(()),
            dispatcher: Mutex::new(None),
        });

        let handle = tokio::spawn(dispatcher::run(Arc::downgrade(&inner), events_rx));
        *inner.dispatcher.lock() = Some(handle);

        // A fresh connection has no credentials or listeners to replay
        inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        });

        tracing::debug!(client_id = %inner.client_id, "Client connected");
        Ok(Self { inner })
    }

    /// Emit `event` and wait for the payload of every responder.
    ///
    /// Payloads are returned in the order the backend reported them. An event
    /// nobody answers fails with [`MercuryError::NoListener`]; handler errors
    /// fail with [`MercuryError::AggregatedHandlerError`].
    pub async fn emit(
        &self,
        event: &str,
        body: impl Into<Option<TargetAndPayload>>,
    ) -> Result<Vec<ResponsePayload>> {
        let aggregate = self.emit_aggregate(event, body).await?;
        Ok(aggregate.into_payloads())
    }

    /// Emit `event` and return the full aggregate reply.
    ///
    /// The aggregate has passed the same checks as [`emit`](Self::emit).
    pub async fn emit_aggregate(
        &self,
        event: &str,
        body: impl Into<Option<TargetAndPayload>>,
    ) -> Result<AggregateResponse> {
        let body = body.into().unwrap_or_default();
        let timeout = self.inner.options.timeout;
        let deadline = Instant::now() + timeout;

        let transport = self.inner.ready_transport(event, deadline).await?;
        let aggregate = round_trip(
            &self.inner.correlator,
            transport.as_ref(),
            event,
            body,
            deadline,
            timeout,
        )
        .await?;

        check_aggregate(event, &aggregate)?;
        tracing::debug!(
            event = event,
            responses = aggregate.total_responses,
            "Emit completed"
        );
        Ok(aggregate)
    }

    /// Register `handler` as this client's answer to `event`.
    ///
    /// Replaces any handler previously registered for the same name. While
    /// connected, the backend is told the full set of handled events before
    /// this returns.
    pub async fn on<F>(&self, event: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(TargetAndPayload) -> ListenerResult + Send + Sync + 'static,
    {
        let event = event.into();
        if self.state() == ConnectionState::Disconnected {
            return Err(MercuryError::NotConnected);
        }

        let _guard = self.inner.registration_sync.lock().await;
        if self.inner.registry.register(event.clone(), Arc::new(handler)) {
            tracing::debug!("Replaced listener for {}", event);
        } else {
            tracing::debug!("Registered listener for {}", event);
        }

        self.inner.sync_listeners_if_connected().await
    }

    /// Remove this client's handler for `event`. Removing an unknown name is a no-op.
    pub async fn off(&self, event: &str) -> Result<()> {
        let _guard = self.inner.registration_sync.lock().await;
        if !self.inner.registry.deregister(event) {
            return Ok(());
        }

        tracing::debug!("Removed listener for {}", event);
        self.inner.sync_listeners_if_connected().await
    }

    /// Assert an identity on this connection.
    ///
    /// On success the credentials replace any previously remembered ones and
    /// are replayed after every reconnect. Returns the backend's acknowledgement.
    pub async fn authenticate(&self, payload: AuthenticatePayload) -> Result<ResponsePayload> {
        payload.validate()?;

        let timeout = self.inner.options.timeout;
        let deadline = Instant::now() + timeout;
        let transport = self
            .inner
            .ready_transport(fqen::AUTHENTICATE, deadline)
            .await?;

        let ack = auth::authenticate(
            &self.inner.correlator,
            transport.as_ref(),
            &payload,
            deadline,
            timeout,
        )
        .await?;

        self.inner.auth.remember(payload);
        Ok(ack)
    }

    /// Ask the backend who this connection is authenticated as
    pub async fn whoami(&self) -> Result<ResponsePayload> {
        let payloads = self.emit(fqen::WHOAMI, None).await?;
        Ok(payloads.into_iter().next().unwrap_or_default())
    }

    /// Tear down the connection. Idempotent.
    ///
    /// In-flight emits fail with [`MercuryError::NotConnected`]; listeners and
    /// remembered credentials are discarded.
    pub fn disconnect(&self) {
        self.inner.shutdown();
    }

    /// Live connectivity of the underlying transport
    pub fn is_connected(&self) -> bool {
        if self.state() == ConnectionState::Disconnected {
            return false;
        }
        self.inner
            .current_transport()
            .map_or(false, |transport| transport.is_connected())
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Wait until the client is [`ConnectionState::Connected`], bounded by the configured timeout
    pub async fn wait_until_connected(&self) -> Result<()> {
        let timeout = self.inner.options.timeout;
        let mut state_rx = self.inner.state.subscribe();
        let settled = state_rx.wait_for(|state| {
            matches!(state, ConnectionState::Connected | ConnectionState::Disconnected)
        });

        let state = match tokio::time::timeout(timeout, settled).await {
            Ok(Ok(state)) => *state,
            Ok(Err(_)) => ConnectionState::Disconnected,
            Err(_) => {
                return Err(MercuryError::Timeout {
                    event: "connect".to_string(),
                    timeout,
                })
            }
        };

        match state {
            ConnectionState::Connected => Ok(()),
            _ => Err(MercuryError::NotConnected),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Responder reference this client answers routed events with
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// Number of events this client currently answers
    pub fn listener_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Whether this client currently answers `event`
    pub fn is_listening(&self, event: &str) -> bool {
        self.inner.registry.contains(event)
    }

    /// Credentials that will be replayed after a reconnect
    pub fn current_auth(&self) -> Option<AuthenticatePayload> {
        self.inner.auth.current()
    }

    /// Number of emits still waiting for their reply
    pub fn pending_replies(&self) -> usize {
        self.inner.correlator.in_flight()
    }
}

impl fmt::Debug for MercuryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MercuryClient")
            .field("host", &self.inner.options.host)
            .field("client_id", &self.inner.client_id)
            .field("state", &self.state())
            .field("listeners", &self.inner.registry.events())
            .finish()
    }
}

impl ClientInner {
    pub(crate) fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(crate) fn current_transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().clone()
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Number of drops the transport has reported so far
    pub(crate) fn drop_count(&self) -> u64 {
        self.drops.load(Ordering::SeqCst)
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(state = %next, "Connection state changed from {}", previous);
        }
    }

    /// Wait for a usable transport, or fail if the client cannot get one before `deadline`
    async fn ready_transport(&self, event: &str, deadline: Instant) -> Result<Arc<dyn Transport>> {
        let mut state_rx = self.state.subscribe();

        loop {
            let state = *state_rx.borrow_and_update();
            match state {
                ConnectionState::Disconnected => return Err(MercuryError::NotConnected),
                ConnectionState::Connected => {
                    if let Some(transport) = self.current_transport() {
                        if transport.is_connected() {
                            return Ok(transport);
                        }
                    }
                    if !self.options.should_retry_connect {
                        return Err(MercuryError::NotConnected);
                    }
                }
                ConnectionState::Connecting | ConnectionState::Reconnecting => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(MercuryError::Timeout {
                    event: event.to_string(),
                    timeout: self.options.timeout,
                });
            }

            let slice = (now + READY_POLL_INTERVAL).min(deadline);
            if let Ok(Err(_)) = tokio::time::timeout_at(slice, state_rx.changed()).await {
                return Err(MercuryError::NotConnected);
            }
        }
    }

    /// Tell the backend the complete set of events this connection answers
    async fn sync_listeners(&self, transport: &dyn Transport) -> Result<()> {
        let events = self.registry.events();
        let timeout = self.options.timeout;
        let deadline = Instant::now() + timeout;

        let entries: Vec<Value> = events
            .iter()
            .map(|event| json!({ "eventName": event }))
            .collect();
        let mut payload = JsonMap::new();
        payload.insert("events".to_string(), Value::Array(entries));
        let body = TargetAndPayload::new().with_payload(payload);

        let aggregate = round_trip(
            &self.correlator,
            transport,
            fqen::REGISTER_LISTENERS,
            body,
            deadline,
            timeout,
        )
        .await?;
        check_aggregate(fqen::REGISTER_LISTENERS, &aggregate)?;

        tracing::debug!("Registered {} listener(s) with the backend", events.len());
        Ok(())
    }

    /// Push the listener set now if the connection is usable.
    ///
    /// While reconnecting the set is left for the reconnect replay. Callers
    /// hold `registration_sync`.
    async fn sync_listeners_if_connected(&self) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Ok(());
        }
        match self.current_transport() {
            Some(transport) if transport.is_connected() => {
                self.sync_listeners(transport.as_ref()).await
            }
            _ => Ok(()),
        }
    }

    /// The transport reported a lost connection.
    ///
    /// In-flight emits fail either way; they are never carried across a reconnect.
    pub(crate) fn handle_drop(&self, reason: &str) {
        if self.state() == ConnectionState::Disconnected {
            return;
        }
        self.drops.fetch_add(1, Ordering::SeqCst);

        if self.options.should_retry_connect {
            tracing::warn!("Connection dropped ({}), waiting for reconnect", reason);
            self.set_state(ConnectionState::Reconnecting);
        } else {
            tracing::warn!("Connection dropped ({}) and retry is disabled", reason);
            self.set_state(ConnectionState::Disconnected);
        }
        self.correlator.fail_all();
    }

    /// The transport is back: replay credentials, then listeners, then mark connected.
    ///
    /// `observed_drops` is the drop count when the reconnect was reported. If
    /// another drop arrives meanwhile, the client stays `Reconnecting`.
    pub(crate) async fn handle_reconnect(&self, observed_drops: u64) {
        if self.state() == ConnectionState::Disconnected {
            return;
        }
        self.set_state(ConnectionState::Reconnecting);

        let Some(transport) = self.current_transport() else {
            return;
        };

        let _guard = self.registration_sync.lock().await;

        if let Some(payload) = self.auth.current() {
            let timeout = self.options.timeout;
            let deadline = Instant::now() + timeout;
            match auth::authenticate(&self.correlator, transport.as_ref(), &payload, deadline, timeout)
                .await
            {
                Ok(_) => tracing::debug!("Replayed {} authentication", payload.kind()),
                Err(e) => tracing::warn!("Failed to replay authentication: {}", e),
            }
        }

        if !self.registry.is_empty() {
            if let Err(e) = self.sync_listeners(transport.as_ref()).await {
                tracing::warn!("Failed to re-register listeners: {}", e);
            }
        }

        // An explicit disconnect or a fresh drop during the replay wins
        let restored = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Reconnecting
                && self.drop_count() == observed_drops
                && transport.is_connected()
            {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        });
        if restored {
            tracing::info!("Connection restored");
        } else {
            tracing::debug!("Connection lost again during replay, still {}", self.state());
        }
    }

    fn shutdown(&self) {
        self.set_state(ConnectionState::Disconnected);

        if let Some(transport) = self.transport.write().take() {
            tracing::info!("Disconnecting from {}", transport.host());
            transport.disconnect();
        }
        if let Some(handle) = self.dispatcher.lock().take() {
            handle.abort();
        }

        self.correlator.fail_all();
        self.registry.clear();
        self.auth.forget();
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.get_mut().take() {
            transport.disconnect();
        }
        if let Some(handle) = self.dispatcher.get_mut().take() {
            handle.abort();
        }
    }
}

/// Fluent construction of a [`MercuryClient`]
#[derive(Default)]
pub struct MercuryClientBuilder {
    options: ClientOptions,
    factory: Option<Arc<dyn TransportFactory>>,
}

impl MercuryClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.options.host = host.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = timeout;
        self
    }

    pub fn should_retry_connect(mut self, should_retry_connect: bool) -> Self {
        self.options.should_retry_connect = should_retry_connect;
        self
    }

    /// Replace all options at once
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the factory used to dial the backend
    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Validate the configuration and connect
    pub async fn connect(self) -> Result<MercuryClient> {
        let factory = self.factory.ok_or_else(|| {
            MercuryError::InvalidOptions("A transport factory is required".to_string())
        })?;
        MercuryClient::connect(self.options, factory).await
    }
}
