//! Listener registry for inbound events
//!
//! The registry maps fully-qualified event names to the handler that answers
//! them. At most one handler exists per name: registering again replaces the
//! previous handler. The registry never calls a handler while holding its lock,
//! so handlers are free to register or deregister other listeners.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use mercury_transport::{JsonMap, ResponsePayload, SingleResponse, TargetAndPayload};
use parking_lot::RwLock;
use serde_json::{json, Value};

/// Error code used when a handler fails without choosing its own
pub const LISTENER_ERROR: &str = "LISTENER_ERROR";
/// Error code reported when an event reaches a client with no handler for it
pub const NO_LISTENER: &str = "NO_LISTENER";
/// Error code reported when a handler returns something other than a mapping
pub const INVALID_RESPONSE: &str = "INVALID_RESPONSE";

/// An error returned by a listener callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerError {
    /// Machine-readable code
    pub code: String,
    /// Human-readable description
    pub message: String,
}

impl ListenerError {
    /// Create an error with the generic [`LISTENER_ERROR`] code
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_code(LISTENER_ERROR, message)
    }

    /// Create an error with a specific code
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The wire form carried in a responder's error list
    pub fn to_value(&self) -> Value {
        json!({ "code": self.code, "message": self.message })
    }
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ListenerError {}

impl From<&str> for ListenerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ListenerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// What a listener callback returns
pub type ListenerResult = Result<Value, ListenerError>;

/// A registered handler for one event name
pub type Listener = Arc<dyn Fn(TargetAndPayload) -> ListenerResult + Send + Sync>;

/// Why an inbound event could not be answered with a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No handler is registered for the event
    NoListener,
    /// The handler returned an error
    Handler(ListenerError),
    /// The handler returned a value that is not a mapping
    InvalidResponse(String),
}

impl DispatchError {
    /// Responder-level error values describing this failure
    pub fn to_errors(&self, event: &str) -> Vec<Value> {
        let error = match self {
            Self::NoListener => ListenerError::with_code(
                NO_LISTENER,
                format!("No listener registered for event {event}"),
            ),
            Self::Handler(error) => error.clone(),
            Self::InvalidResponse(kind) => ListenerError::with_code(
                INVALID_RESPONSE,
                format!("Listener for {event} returned {kind}, expected an object"),
            ),
        };
        vec![error.to_value()]
    }
}

/// Thread-safe map from event name to handler.
///
/// Cloning a registry produces another handle to the same map.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    listeners: Arc<RwLock<HashMap<String, Listener>>>,
}

impl ListenerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `event`, replacing any previous handler.
    ///
    /// # Arguments
    /// * `event` - Fully-qualified event name, stored verbatim
    /// * `listener` - Handler to invoke for matching inbound events
    ///
    /// # Returns
    /// `true` if a previous handler was replaced
    pub fn register(&self, event: impl Into<String>, listener: Listener) -> bool {
        self.listeners
            .write()
            .insert(event.into(), listener)
            .is_some()
    }

    /// Remove the handler for `event`.
    ///
    /// # Returns
    /// `true` if a handler was removed, `false` if none was registered
    pub fn deregister(&self, event: &str) -> bool {
        self.listeners.write().remove(event).is_some()
    }

    /// Get the handler currently registered for `event`
    pub fn lookup(&self, event: &str) -> Option<Listener> {
        self.listeners
            .read()
            .get(event)
            .map(Arc::clone)
    }

    /// Invoke the handler for `event` and normalize its result.
    ///
    /// An object becomes the payload, `null` becomes an empty payload, and any
    /// other value is reported as [`DispatchError::InvalidResponse`].
    pub fn dispatch(
        &self,
        event: &str,
        body: TargetAndPayload,
    ) -> Result<ResponsePayload, DispatchError> {
        let listener = self.lookup(event).ok_or(DispatchError::NoListener)?;

        match listener(body) {
            Ok(Value::Object(payload)) => Ok(payload),
            Ok(Value::Null) => Ok(JsonMap::new()),
            Ok(other) => Err(DispatchError::InvalidResponse(value_kind(&other).to_string())),
            Err(error) => Err(DispatchError::Handler(error)),
        }
    }

    /// Invoke the handler for `event` and package the outcome as a responder result
    pub fn respond(
        &self,
        event: &str,
        body: TargetAndPayload,
        responder_ref: &str,
    ) -> SingleResponse {
        match self.dispatch(event, body) {
            Ok(payload) => SingleResponse::success(responder_ref, payload),
            Err(error) => {
                tracing::debug!("Listener for {} failed: {:?}", event, error);
                SingleResponse::failure(responder_ref, error.to_errors(event))
            }
        }
    }

    /// Every registered event name, sorted
    pub fn events(&self) -> Vec<String> {
        let mut events: Vec<String> = self.listeners.read().keys().cloned().collect();
        events.sort();
        events
    }

    /// Whether a handler is registered for `event`
    pub fn contains(&self, event: &str) -> bool {
        self.listeners.read().contains_key(event)
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Whether no handlers are registered
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Remove every handler
    pub fn clear(&self) {
        self.listeners.write().clear();
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("events", &self.events())
            .finish()
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
