//! In-memory backend shared by any number of fake transports
//!
//! [`FakeBackend`] plays the server: it answers the built-in authenticate,
//! register-listeners and whoami events itself, runs backend-side handlers
//! added with [`FakeBackend::handle`], and fans every other event out to the
//! connections that registered a listener for it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use mercury_transport::{
    fake_responder_ref, fqen, AggregateResponse, CorrelationId, JsonMap, OutboundFrame,
    ReplyError, ReplyOutcome, SingleResponse, TargetAndPayload, Transport, TransportError,
    TransportEvent, TransportEventSender, TransportFactory, TransportOptions,
};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use url::Url;

use crate::helpers::json_map;

/// Error code for a responder that did not answer within the emitter's timeout
pub const RESPONDER_TIMEOUT: &str = "RESPONDER_TIMEOUT";
/// Error code for unknown credentials
pub const INVALID_AUTH_TOKEN: &str = "INVALID_AUTH_TOKEN";
/// Error code for an authenticate payload that is neither a token nor skill credentials
pub const INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";

/// Extra time responders get beyond the emitter's own timeout
const RESPONDER_GRACE: Duration = Duration::from_millis(100);

/// A handler run by the backend itself; `Err` values become responder errors
pub type BackendHandler = Arc<dyn Fn(&TargetAndPayload) -> Result<Value, Value> + Send + Sync>;

struct BackendState {
    connections: RwLock<Vec<Arc<FakeTransport>>>,
    handlers: RwLock<HashMap<String, BackendHandler>>,
    tokens: RwLock<HashMap<String, JsonMap>>,
    skills: RwLock<HashMap<(String, String), JsonMap>>,

    /// Routed requests waiting for a connection's answer
    pending: DashMap<CorrelationId, oneshot::Sender<SingleResponse>>,

    refuse_connections: AtomicBool,
    next_connection: AtomicUsize,
}

/// Shared in-memory backend.
///
/// Cloning produces another handle to the same backend.
#[derive(Clone)]
pub struct FakeBackend {
    state: Arc<BackendState>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(BackendState {
                connections: RwLock::new(Vec::new()),
                handlers: RwLock::new(HashMap::new()),
                tokens: RwLock::new(HashMap::new()),
                skills: RwLock::new(HashMap::new()),
                pending: DashMap::new(),
                refuse_connections: AtomicBool::new(false),
                next_connection: AtomicUsize::new(0),
            }),
        }
    }

    /// A factory that connects clients to this backend
    pub fn factory(&self) -> Arc<dyn TransportFactory> {
        Arc::new(self.clone())
    }

    /// Every connection made so far, in connection order
    pub fn connections(&self) -> Vec<Arc<FakeTransport>> {
        self.state.connections.read().clone()
    }

    pub fn connection(&self, index: usize) -> Option<Arc<FakeTransport>> {
        self.state.connections.read().get(index).cloned()
    }

    pub fn last_connection(&self) -> Option<Arc<FakeTransport>> {
        self.state.connections.read().last().cloned()
    }

    /// Answer `event` on the backend instead of routing it to clients
    pub fn handle<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&TargetAndPayload) -> Result<Value, Value> + Send + Sync + 'static,
    {
        self.state
            .handlers
            .write()
            .insert(event.into(), Arc::new(handler));
    }

    /// Accept `token` and attach `identity` to connections that present it
    pub fn register_token(&self, token: impl Into<String>, identity: JsonMap) {
        self.state.tokens.write().insert(token.into(), identity);
    }

    /// Accept the skill credentials and attach `identity` to connections that present them
    pub fn register_skill(
        &self,
        skill_id: impl Into<String>,
        api_key: impl Into<String>,
        identity: JsonMap,
    ) {
        self.state
            .skills
            .write()
            .insert((skill_id.into(), api_key.into()), identity);
    }

    /// Make new connection attempts fail
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse_connections.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransportFactory for FakeBackend {
    async fn connect(
        &self,
        host: &Url,
        options: TransportOptions,
        events: TransportEventSender,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        if self.state.refuse_connections.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed {
                host: host.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let id = self.state.next_connection.fetch_add(1, Ordering::SeqCst);
        let transport = Arc::new(FakeTransport {
            id,
            host: host.clone(),
            options,
            connected: AtomicBool::new(true),
            epoch: Arc::new(AtomicUsize::new(0)),
            disconnected: AtomicBool::new(false),
            events,
            backend: Arc::downgrade(&self.state),
            routes: RwLock::new(HashSet::new()),
            identity: RwLock::new(None),
            sent: Mutex::new(Vec::new()),
        });

        tracing::debug!("Fake backend accepted connection {} to {}", id, host);
        self.state.connections.write().push(Arc::clone(&transport));
        Ok(transport)
    }
}

/// One client's connection to a [`FakeBackend`]
pub struct FakeTransport {
    id: usize,
    host: Url,
    options: TransportOptions,
    connected: AtomicBool,
    /// Bumped whenever the connection is lost; replies from an older epoch are dropped
    epoch: Arc<AtomicUsize>,
    disconnected: AtomicBool,
    events: TransportEventSender,
    backend: Weak<BackendState>,

    /// Events this connection answers, as last registered
    routes: RwLock<HashSet<String>>,
    identity: RwLock<Option<JsonMap>>,
    sent: Mutex<Vec<OutboundFrame>>,
}

impl FakeTransport {
    /// Position of this connection in [`FakeBackend::connections`]
    pub fn id(&self) -> usize {
        self.id
    }

    /// The options the client connected with
    pub fn options(&self) -> TransportOptions {
        self.options
    }

    /// Flip live connectivity without notifying the client
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Lose the connection. The backend forgets this connection's listeners
    /// and identity, as a real server does.
    pub fn simulate_drop(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.routes.write().clear();
        *self.identity.write() = None;
        let _ = self.events.send(TransportEvent::Dropped {
            reason: "simulated drop".to_string(),
        });
    }

    /// Restore the connection and tell the client
    pub fn simulate_reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Reconnected);
    }

    /// Every frame the client sent, in order
    pub fn sent_frames(&self) -> Vec<OutboundFrame> {
        self.sent.lock().clone()
    }

    /// Names of every event the client emitted, in order
    pub fn emitted_events(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|frame| frame.event().map(str::to_string))
            .collect()
    }

    /// Events the backend currently routes to this connection, sorted
    pub fn registered_events(&self) -> Vec<String> {
        let mut events: Vec<String> = self.routes.read().iter().cloned().collect();
        events.sort();
        events
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.read().is_some()
    }

    /// Whether the client called [`Transport::disconnect`]
    pub fn was_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn routes_to(&self, event: &str) -> bool {
        self.connected.load(Ordering::SeqCst) && self.routes.read().contains(event)
    }

    fn reply(&self, correlation_id: CorrelationId, outcome: ReplyOutcome) {
        if !self.is_connected() {
            tracing::debug!("Connection {} is down, dropping reply {}", self.id, correlation_id);
            return;
        }
        let _ = self.events.send(TransportEvent::Reply {
            correlation_id,
            outcome,
        });
    }

    fn handle_emit(
        &self,
        backend: Arc<BackendState>,
        correlation_id: CorrelationId,
        event: String,
        body: TargetAndPayload,
    ) {
        match event.as_str() {
            fqen::AUTHENTICATE => {
                let aggregate = self.authenticate(&backend, &body.payload);
                self.reply(correlation_id, Ok(aggregate));
                return;
            }
            fqen::REGISTER_LISTENERS => {
                let outcome = self.register_listeners(&body.payload);
                self.reply(correlation_id, outcome);
                return;
            }
            fqen::WHOAMI => {
                let aggregate = AggregateResponse::from_payloads(vec![self.whoami()]);
                self.reply(correlation_id, Ok(aggregate));
                return;
            }
            _ => {}
        }

        let handler = backend.handlers.read().get(&event).cloned();
        if let Some(handler) = handler {
            let response = match handler(&body) {
                Ok(value) => SingleResponse::success(fake_responder_ref(0), json_map(value)),
                Err(error) => SingleResponse::failure(fake_responder_ref(0), vec![error]),
            };
            self.reply(
                correlation_id,
                Ok(AggregateResponse::from_responses(vec![response])),
            );
            return;
        }

        let targets: Vec<Arc<FakeTransport>> = backend
            .connections
            .read()
            .iter()
            .filter(|connection| connection.routes_to(&event))
            .cloned()
            .collect();

        if targets.is_empty() {
            self.reply(correlation_id, Err(ReplyError::NoListener { event }));
            return;
        }

        let events = self.events.clone();
        let epoch = Arc::clone(&self.epoch);
        let sent_in = epoch.load(Ordering::SeqCst);
        let timeout = self.options.timeout + RESPONDER_GRACE;
        tokio::spawn(async move {
            let aggregate = fan_out(&backend, targets, &event, body, timeout).await;
            if epoch.load(Ordering::SeqCst) != sent_in {
                tracing::debug!("Emitter dropped before {} was answered", event);
                return;
            }
            let _ = events.send(TransportEvent::Reply {
                correlation_id,
                outcome: Ok(aggregate),
            });
        });
    }

    fn authenticate(&self, backend: &BackendState, payload: &JsonMap) -> AggregateResponse {
        let token = payload.get("token").and_then(Value::as_str);
        let skill_id = payload.get("skillId").and_then(Value::as_str);
        let api_key = payload.get("apiKey").and_then(Value::as_str);

        let identity = match (token, skill_id, api_key) {
            (Some(token), None, None) => backend.tokens.read().get(token).cloned(),
            (None, Some(skill_id), Some(api_key)) => backend
                .skills
                .read()
                .get(&(skill_id.to_string(), api_key.to_string()))
                .cloned(),
            _ => {
                let error = json!({
                    "code": INVALID_PAYLOAD,
                    "message": "Expected a token or a skillId and apiKey",
                });
                return AggregateResponse::from_responses(vec![SingleResponse::failure(
                    fake_responder_ref(0),
                    vec![error],
                )]);
            }
        };

        match identity {
            Some(identity) => {
                *self.identity.write() = Some(identity.clone());
                let ack = json_map(json!({ "type": "authenticated", "auth": identity }));
                AggregateResponse::from_payloads(vec![ack])
            }
            None => {
                let error = json!({
                    "code": INVALID_AUTH_TOKEN,
                    "message": "Credentials were not recognized",
                });
                AggregateResponse::from_responses(vec![SingleResponse::failure(
                    fake_responder_ref(0),
                    vec![error],
                )])
            }
        }
    }

    fn register_listeners(&self, payload: &JsonMap) -> ReplyOutcome {
        let entries = payload
            .get("events")
            .and_then(Value::as_array)
            .ok_or_else(|| ReplyError::Rejected("register-listeners requires an events list".to_string()))?;

        let mut routes = HashSet::new();
        for entry in entries {
            let name = entry
                .get("eventName")
                .and_then(Value::as_str)
                .ok_or_else(|| ReplyError::Rejected("every listener needs an eventName".to_string()))?;
            routes.insert(name.to_string());
        }

        tracing::debug!("Connection {} now answers {} event(s)", self.id, routes.len());
        *self.routes.write() = routes;
        Ok(AggregateResponse::from_payloads(vec![JsonMap::new()]))
    }

    fn whoami(&self) -> JsonMap {
        match self.identity.read().as_ref() {
            Some(identity) => json_map(json!({ "type": "authenticated", "auth": identity })),
            None => json_map(json!({ "type": "anonymous", "auth": {} })),
        }
    }

    fn complete_request(&self, correlation_id: CorrelationId, response: SingleResponse) {
        let Some(backend) = self.backend.upgrade() else {
            return;
        };
        if let Some((_, tx)) = backend.pending.remove(&correlation_id) {
            let _ = tx.send(response);
        }
    }
}

/// Route `event` to every target and collect their answers in connection order
async fn fan_out(
    backend: &BackendState,
    targets: Vec<Arc<FakeTransport>>,
    event: &str,
    body: TargetAndPayload,
    timeout: Duration,
) -> AggregateResponse {
    let waits = targets.iter().map(|target| {
        let correlation_id = CorrelationId::new();
        let (tx, rx) = oneshot::channel();
        backend.pending.insert(correlation_id, tx);

        let _ = target.events.send(TransportEvent::Request {
            correlation_id,
            event: event.to_string(),
            body: body.clone(),
        });

        async move {
            let answer = tokio::time::timeout(timeout, rx).await;
            backend.pending.remove(&correlation_id);
            answer.ok().and_then(Result::ok)
        }
    });

    let answers = join_all(waits).await;

    let responses = answers
        .into_iter()
        .enumerate()
        .map(|(index, answer)| match answer {
            Some(mut response) => {
                response.responder_ref = fake_responder_ref(index);
                response
            }
            None => SingleResponse::failure(
                fake_responder_ref(index),
                vec![json!({
                    "code": RESPONDER_TIMEOUT,
                    "message": format!("Responder did not answer {event} in time"),
                })],
            ),
        })
        .collect();

    AggregateResponse::from_responses(responses)
}

#[async_trait]
impl Transport for FakeTransport {
    fn host(&self) -> &Url {
        &self.host
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        self.sent.lock().push(frame.clone());

        if !self.is_connected() {
            return Err(TransportError::SendFailed(format!(
                "connection {} is not connected",
                self.id
            )));
        }

        match frame {
            OutboundFrame::Emit {
                correlation_id,
                event,
                body,
            } => {
                let backend = self.backend.upgrade().ok_or(TransportError::Closed)?;
                self.handle_emit(backend, correlation_id, event, body);
            }
            OutboundFrame::Respond {
                correlation_id,
                response,
            } => self.complete_request(correlation_id, response),
        }

        Ok(())
    }

    fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.routes.write().clear();
        *self.identity.write() = None;
    }
}
