//! Integration tests for authentication and reconnection.


use std::time::Duration;

use mercury_client::{fqen, AuthenticatePayload, ConnectionState, MercuryError};
use mercury_testkit::{json_map, FakeBackend, INVALID_AUTH_TOKEN};
use serde_json::{json, Value};
use tokio_test::assert_ok;

use test_helpers::{bounce, connect_client, connect_with, test_options, wait_for_state};

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_authenticate_with_token() {
    let backend = FakeBackend::new();
    backend.register_token("good-token", json_map(json!({ "personId": "person-1" })));
    let (client, transport) = connect_client(&backend).await;

    let anonymous = client.whoami().await.unwrap();
    assert_eq!(anonymous["type"], json!("anonymous"));

    let payload = AuthenticatePayload::token("good-token").unwrap();
    let ack = assert_ok!(client.authenticate(payload.clone()).await);
    assert_eq!(ack["type"], json!("authenticated"));
    assert_eq!(ack["auth"]["personId"], json!("person-1"));

    assert_eq!(client.current_auth(), Some(payload));
    assert!(transport.is_authenticated());

    let whoami = client.whoami().await.unwrap();
    assert_eq!(whoami["type"], json!("authenticated"));
}

#[tokio::test]
async fn test_authenticate_with_skill() {
    let backend = FakeBackend::new();
    backend.register_skill("skill-1", "key-1", json_map(json!({ "skillId": "skill-1" })));
    let (client, _) = connect_client(&backend).await;

    let ack = client
        .authenticate(AuthenticatePayload::skill("skill-1", "key-1").unwrap())
        .await
        .unwrap();
    assert_eq!(ack["auth"]["skillId"], json!("skill-1"));
}

#[tokio::test]
async fn test_rejected_credentials_are_not_remembered() {
    let backend = FakeBackend::new();
    backend.register_token("good-token", json_map(json!({ "personId": "person-1" })));
    let (client, transport) = connect_client(&backend).await;

    let result = client
        .authenticate(AuthenticatePayload::token("wrong-token").unwrap())
        .await;
    match result {
        Err(MercuryError::AuthenticationRejected { errors }) => {
            assert_eq!(errors[0].errors[0]["code"], json!(INVALID_AUTH_TOKEN));
        }
        other => panic!("Expected AuthenticationRejected, got {other:?}"),
    }
    assert!(client.current_auth().is_none());
    assert!(!transport.is_authenticated());

    // A later success is remembered
    client
        .authenticate(AuthenticatePayload::token("good-token").unwrap())
        .await
        .unwrap();
    assert!(client.current_auth().is_some());
}

#[tokio::test]
async fn test_malformed_credentials_never_reach_backend() {
    let backend = FakeBackend::new();
    let (client, transport) = connect_client(&backend).await;

    let payload = AuthenticatePayload::Skill {
        skill_id: "skill-1".to_string(),
        api_key: String::new(),
    };
    assert!(matches!(
        client.authenticate(payload).await,
        Err(MercuryError::InvalidAuthPayload(_))
    ));
    assert!(transport.sent_frames().is_empty());
}

#[tokio::test]
async fn test_later_authentication_replaces_remembered_payload() {
    let backend = FakeBackend::new();
    backend.register_token("first", json_map(json!({ "personId": "one" })));
    backend.register_token("second", json_map(json!({ "personId": "two" })));
    let (client, transport) = connect_client(&backend).await;

    client.authenticate(AuthenticatePayload::token("first").unwrap()).await.unwrap();
    client.authenticate(AuthenticatePayload::token("second").unwrap()).await.unwrap();
    assert_eq!(
        client.current_auth(),
        Some(AuthenticatePayload::token("second").unwrap())
    );

    bounce(&client, &transport).await;
    let whoami = client.whoami().await.unwrap();
    assert_eq!(whoami["auth"]["personId"], json!("two"));
}

// ============================================================================
// Reconnection
// ============================================================================

#[tokio::test]
async fn test_listener_survives_reconnect() {
    let backend = FakeBackend::new();
    let (client_a, _) = connect_client(&backend).await;
    let (client_b, transport_b) = connect_client(&backend).await;

    client_b
        .on("did-reconnect::v1", |_| Ok(json!({ "still": "here" })))
        .await
        .unwrap();

    transport_b.simulate_drop();
    wait_for_state(&client_b, ConnectionState::Reconnecting).await;
    assert!(!client_b.is_connected());
    assert!(transport_b.registered_events().is_empty());

    transport_b.simulate_reconnect();
    client_b.wait_until_connected().await.unwrap();

    assert!(client_b.is_connected());
    assert_eq!(transport_b.registered_events(), vec!["did-reconnect::v1"]);
    let payloads = client_a.emit("did-reconnect::v1", None).await.unwrap();
    assert_eq!(payloads, vec![json_map(json!({ "still": "here" }))]);
}

#[tokio::test]
async fn test_reconnect_replays_auth_before_listeners() {
    let backend = FakeBackend::new();
    backend.register_token("good-token", json_map(json!({ "personId": "person-1" })));
    let (client, transport) = connect_client(&backend).await;

    client
        .authenticate(AuthenticatePayload::token("good-token").unwrap())
        .await
        .unwrap();
    client.on("anything::v1", |_| Ok(Value::Null)).await.unwrap();

    let before = transport.emitted_events().len();
    bounce(&client, &transport).await;

    let replayed: Vec<String> = transport.emitted_events().into_iter().skip(before).collect();
    assert_eq!(
        replayed,
        vec![fqen::AUTHENTICATE.to_string(), fqen::REGISTER_LISTENERS.to_string()]
    );

    assert!(transport.is_authenticated());
    let whoami = client.whoami().await.unwrap();
    assert_eq!(whoami["type"], json!("authenticated"));
    assert_eq!(whoami["auth"]["personId"], json!("person-1"));
}

#[tokio::test]
async fn test_reconnect_without_session_sends_nothing() {
    let backend = FakeBackend::new();
    let (client, transport) = connect_client(&backend).await;

    bounce(&client, &transport).await;
    assert!(transport.emitted_events().is_empty());
}

#[tokio::test]
async fn test_listener_added_while_reconnecting_is_registered() {
    let backend = FakeBackend::new();
    let (client_a, _) = connect_client(&backend).await;
    let (client_b, transport_b) = connect_client(&backend).await;

    transport_b.simulate_drop();
    wait_for_state(&client_b, ConnectionState::Reconnecting).await;

    client_b.on("late::v1", |_| Ok(json!({ "late": true }))).await.unwrap();
    assert!(client_b.is_listening("late::v1"));

    transport_b.simulate_reconnect();
    client_b.wait_until_connected().await.unwrap();

    assert_eq!(transport_b.registered_events(), vec!["late::v1"]);
    assert!(client_a.emit("late::v1", None).await.is_ok());
}

#[tokio::test]
async fn test_emit_waits_for_reconnect() {
    let backend = FakeBackend::new();
    let (client, transport) = connect_client(&backend).await;

    transport.simulate_drop();
    wait_for_state(&client, ConnectionState::Reconnecting).await;

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.whoami().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!pending.is_finished());

    transport.simulate_reconnect();
    let whoami = pending.await.unwrap().unwrap();
    assert_eq!(whoami["type"], json!("anonymous"));
}

#[tokio::test]
async fn test_emit_while_reconnecting_times_out() {
    let backend = FakeBackend::new();
    let (client, transport) = connect_with(&backend, test_options(Duration::from_millis(200))).await;

    transport.simulate_drop();
    wait_for_state(&client, ConnectionState::Reconnecting).await;

    let err = client.emit(fqen::WHOAMI, None).await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(client.pending_replies(), 0);
}

#[tokio::test]
async fn test_drop_without_retry_disconnects() {
    let backend = FakeBackend::new();
    let options = test_options(Duration::from_secs(2)).with_retry_connect(false);
    let (client, transport) = connect_with(&backend, options).await;
    assert!(!transport.options().reconnection);

    transport.simulate_drop();
    wait_for_state(&client, ConnectionState::Disconnected).await;

    assert!(!client.is_connected());
    assert!(matches!(
        client.emit(fqen::WHOAMI, None).await,
        Err(MercuryError::NotConnected)
    ));
}

#[tokio::test]
async fn test_drop_fails_in_flight_emit() {
    let backend = FakeBackend::new();
    let (client_a, transport_a) = connect_client(&backend).await;
    let (client_b, _) = connect_client(&backend).await;

    client_b
        .on("slow-answer::v1", |_| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(json!({ "ok": true }))
        })
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    let pending = tokio::spawn({
        let client = client_a.clone();
        async move { client.emit("slow-answer::v1", None).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    transport_a.simulate_drop();

    assert!(matches!(
        pending.await.unwrap(),
        Err(MercuryError::NotConnected)
    ));
    assert!(started.elapsed() < Duration::from_millis(300));
    assert_eq!(client_a.pending_replies(), 0);
    assert_eq!(client_a.state(), ConnectionState::Reconnecting);

    // The answer to the abandoned emit never reaches the restored connection
    transport_a.simulate_reconnect();
    client_a.wait_until_connected().await.unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(client_a.pending_replies(), 0);
    let payloads = client_a.emit("slow-answer::v1", None).await.unwrap();
    assert_eq!(payloads, vec![json_map(json!({ "ok": true }))]);
}

#[tokio::test]
async fn test_drop_without_retry_fails_in_flight_emit() {
    let backend = FakeBackend::new();
    let options = test_options(Duration::from_secs(2)).with_retry_connect(false);
    let (client_a, transport_a) = connect_with(&backend, options).await;
    let (client_b, _) = connect_client(&backend).await;

    client_b
        .on("slow-answer::v1", |_| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(Value::Null)
        })
        .await
        .unwrap();

    let pending = tokio::spawn({
        let client = client_a.clone();
        async move { client.emit("slow-answer::v1", None).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    transport_a.simulate_drop();

    assert!(matches!(
        pending.await.unwrap(),
        Err(MercuryError::NotConnected)
    ));
    assert_eq!(client_a.state(), ConnectionState::Disconnected);
    assert_eq!(client_a.pending_replies(), 0);
}

#[tokio::test]
async fn test_drop_during_replay_stays_reconnecting() {
    let backend = FakeBackend::new();
    let (client, transport) = connect_client(&backend).await;
    client.on("flaky::v1", |_| Ok(Value::Null)).await.unwrap();

    transport.simulate_drop();
    transport.simulate_reconnect();
    transport.simulate_drop();

    wait_for_state(&client, ConnectionState::Reconnecting).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.state(), ConnectionState::Reconnecting);
    assert!(!client.is_connected());

    transport.simulate_reconnect();
    client.wait_until_connected().await.unwrap();
    assert!(client.is_connected());
    assert_eq!(transport.registered_events(), vec!["flaky::v1"]);
}

#[tokio::test]
async fn test_disconnect_abandons_in_flight_emit() {
    let backend = FakeBackend::new();
    let (client_a, _) = connect_client(&backend).await;
    let (client_b, _) = connect_client(&backend).await;

    client_b
        .on("never-mind::v1", |_| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(Value::Null)
        })
        .await
        .unwrap();

    let pending = tokio::spawn({
        let client = client_a.clone();
        async move { client.emit("never-mind::v1", None).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    client_a.disconnect();
    assert!(matches!(
        pending.await.unwrap(),
        Err(MercuryError::NotConnected)
    ));
    assert_eq!(client_a.state(), ConnectionState::Disconnected);
    assert_eq!(client_a.listener_count(), 0);
}

#[tokio::test]
async fn test_disconnect_forgets_session() {
    let backend = FakeBackend::new();
    backend.register_token("good-token", json_map(json!({})));
    let (client, _) = connect_client(&backend).await;

    client
        .authenticate(AuthenticatePayload::token("good-token").unwrap())
        .await
        .unwrap();
    client.on("a::v1", |_| Ok(Value::Null)).await.unwrap();

    client.disconnect();
    assert!(client.current_auth().is_none());
    assert_eq!(client.listener_count(), 0);
    assert!(matches!(
        client.wait_until_connected().await,
        Err(MercuryError::NotConnected)
    ));
}
