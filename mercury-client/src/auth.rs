//! Session authentication
//!
//! Credentials accepted by the backend are remembered so they can be replayed
//! on a fresh connection after a reconnect.

use std::sync::Arc;
use std::time::Duration;

use mercury_transport::{fqen, AuthenticatePayload, ResponsePayload, TargetAndPayload, Transport};
use parking_lot::RwLock;
use tokio::time::Instant;

use crate::correlator::{round_trip, unwrap_aggregate, Correlator};
use crate::error::{MercuryError, Result};

/// Holds the most recently accepted credentials
#[derive(Clone, Default)]
pub struct AuthManager {
    current: Arc<RwLock<Option<AuthenticatePayload>>>,
}

impl AuthManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember credentials for replay, replacing any previous ones
    pub fn remember(&self, payload: AuthenticatePayload) {
        *self.current.write() = Some(payload);
    }

    /// The credentials that will be replayed after a reconnect
    pub fn current(&self) -> Option<AuthenticatePayload> {
        self.current.read().clone()
    }

    pub fn forget(&self) {
        *self.current.write() = None;
    }
}

/// Emit the authenticate event and return the backend's description of the session.
///
/// Handler-level errors from the backend are reported as
/// [`MercuryError::AuthenticationRejected`].
pub async fn authenticate(
    correlator: &Correlator,
    transport: &dyn Transport,
    payload: &AuthenticatePayload,
    deadline: Instant,
    timeout: Duration,
) -> Result<ResponsePayload> {
    payload.validate()?;
    tracing::debug!("Authenticating with {} credentials", payload.kind());

    let body = TargetAndPayload::new().with_payload(payload.to_payload());
    let aggregate = round_trip(
        correlator,
        transport,
        fqen::AUTHENTICATE,
        body,
        deadline,
        timeout,
    )
    .await?;

    let payloads = unwrap_aggregate(fqen::AUTHENTICATE, aggregate).map_err(|e| match e {
        MercuryError::AggregatedHandlerError { errors, .. } => {
            MercuryError::AuthenticationRejected { errors }
        }
        other => other,
    })?;

    Ok(payloads.into_iter().next().unwrap_or_default())
}
