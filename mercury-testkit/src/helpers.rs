//! Small builders used by tests against the fake backend

use mercury_transport::{AggregateResponse, JsonMap, ResponsePayload};
use serde_json::Value;
use uuid::Uuid;

/// Wrap `payloads` in an error-free aggregate with `fake-responder-N` refs
pub fn build_aggregate_response(payloads: Vec<ResponsePayload>) -> AggregateResponse {
    AggregateResponse::from_payloads(payloads)
}

/// A random identifier, unique per call
pub fn generate_random_id() -> String {
    Uuid::new_v4().to_string()
}

/// The mapping inside `value`, or an empty mapping if it is not an object
pub fn json_map(value: Value) -> JsonMap {
    match value {
        Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}
