//! Integration tests for the blocking client. No async/await in sight.

use std::time::Duration;

use mercury_client::blocking::MercuryClient;
use mercury_client::{AuthenticatePayload, ClientOptions, ConnectionState, MercuryError, TargetAndPayload};
use mercury_testkit::{json_map, FakeBackend};
use serde_json::json;

fn options() -> ClientOptions {
    ClientOptions::new()
        .with_host("http://waka-waka")
        .with_timeout(Duration::from_secs(2))
}

#[test]
fn test_blocking_emit_and_listen() {
    let backend = FakeBackend::new();
    let client_a = MercuryClient::connect(options(), backend.factory()).unwrap();
    let client_b = MercuryClient::connect(options(), backend.factory()).unwrap();

    client_b
        .on("add::v1", |body| {
            let a = body.payload["a"].as_i64().unwrap_or_default();
            let b = body.payload["b"].as_i64().unwrap_or_default();
            Ok(json!({ "sum": a + b }))
        })
        .unwrap();

    let body = TargetAndPayload::new().with_payload(json_map(json!({ "a": 2, "b": 3 })));
    let payloads = client_a.emit("add::v1", body).unwrap();
    assert_eq!(payloads, vec![json_map(json!({ "sum": 5 }))]);

    client_b.off("add::v1").unwrap();
    assert!(matches!(
        client_a.emit("add::v1", None),
        Err(MercuryError::NoListener { .. })
    ));
}

#[test]
fn test_blocking_authenticate_and_whoami() {
    let backend = FakeBackend::new();
    backend.register_token("good-token", json_map(json!({ "personId": "person-1" })));
    let client = MercuryClient::connect(options(), backend.factory()).unwrap();

    let ack = client
        .authenticate(AuthenticatePayload::token("good-token").unwrap())
        .unwrap();
    assert_eq!(ack["type"], json!("authenticated"));
    assert_eq!(client.whoami().unwrap()["auth"]["personId"], json!("person-1"));
}

#[test]
fn test_blocking_disconnect() {
    let backend = FakeBackend::new();
    let client = MercuryClient::connect(options(), backend.factory()).unwrap();
    assert!(client.is_connected());
    assert_eq!(client.state(), ConnectionState::Connected);

    client.disconnect();
    client.disconnect();
    assert!(!client.is_connected());
    assert!(matches!(client.whoami(), Err(MercuryError::NotConnected)));
}

#[test]
fn test_blocking_invalid_host() {
    let backend = FakeBackend::new();
    let result = MercuryClient::connect(options().with_host("aoeuao://bad-url"), backend.factory());

    assert!(matches!(result, Err(MercuryError::InvalidHost { .. })));
    assert!(backend.connections().is_empty());
}

#[test]
fn test_dropping_blocking_client_disconnects() {
    let backend = FakeBackend::new();
    let client = MercuryClient::connect(options(), backend.factory()).unwrap();
    let transport = backend.last_connection().unwrap();

    drop(client);
    assert!(transport.was_disconnected());
}
