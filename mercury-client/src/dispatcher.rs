//! Inbound event loop
//!
//! One task per client drains the transport's event channel. Replies complete
//! pending emits inline; routed requests and reconnect replays run on their own
//! tasks so a slow handler never holds up a reply.

use std::sync::{Arc, Weak};

use mercury_transport::{
    CorrelationId, EventName, OutboundFrame, SingleResponse, TargetAndPayload, TransportEvent,
    TransportEventReceiver,
};

use crate::client::ClientInner;
use crate::registry::ListenerError;

/// Error code reported when a listener panics
pub const LISTENER_PANICKED: &str = "LISTENER_PANICKED";

/// Drain `events` until the transport goes away or the client is dropped
pub(crate) async fn run(client: Weak<ClientInner>, mut events: TransportEventReceiver) {
    while let Some(event) = events.recv().await {
        let Some(inner) = client.upgrade() else {
            break;
        };

        match event {
            TransportEvent::Reply {
                correlation_id,
                outcome,
            } => {
                inner.correlator.complete(correlation_id, outcome);
            }
            TransportEvent::Request {
                correlation_id,
                event,
                body,
            } => {
                tracing::trace!("Routed {} as {}", event, correlation_id);
                tokio::spawn(answer(inner, correlation_id, event, body));
            }
            TransportEvent::Dropped { reason } => inner.handle_drop(&reason),
            TransportEvent::Reconnected => {
                let observed_drops = inner.drop_count();
                tokio::spawn(async move { inner.handle_reconnect(observed_drops).await });
            }
        }
    }

    tracing::debug!("Inbound event loop stopped");
}

/// Run the local handler for a routed event and send its result back
async fn answer(
    inner: Arc<ClientInner>,
    correlation_id: CorrelationId,
    event: String,
    body: TargetAndPayload,
) {
    let registry = inner.registry.clone();
    let responder_ref = inner.client_id().to_string();
    let handler_event = event.clone();
    let handler_ref = responder_ref.clone();

    let response = match tokio::task::spawn_blocking(move || {
        registry.respond(&handler_event, body, &handler_ref)
    })
    .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Listener for {} did not complete: {}", event, e);
            let error = ListenerError::with_code(
                LISTENER_PANICKED,
                format!("Listener for {event} did not complete"),
            );
            SingleResponse::failure(responder_ref, vec![error.to_value()])
        }
    };

    let name = EventName::parse(&event);
    tracing::debug!(
        event = name.name(),
        version = name.version().unwrap_or_default(),
        failed = response.is_error(),
        "Answering routed event"
    );

    let Some(transport) = inner.current_transport() else {
        tracing::debug!("Dropping answer to {}: client is disconnected", event);
        return;
    };

    let frame = OutboundFrame::Respond {
        correlation_id,
        response,
    };
    if let Err(e) = transport.send(frame).await {
        tracing::warn!("Failed to answer {}: {}", event, e);
    }
}
