//! Request/reply correlation
//!
//! Every emitted event gets a fresh [`CorrelationId`] and a one-shot slot in
//! the pending table. The dispatcher completes the slot when the transport
//! delivers the matching reply. Each slot is completed at most once; a reply
//! arriving after its waiter gave up finds no slot and is dropped.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use mercury_transport::{
    fqen, AggregateResponse, CorrelationId, EventName, OutboundFrame, ReplyError, ReplyOutcome,
    ResponsePayload, TargetAndPayload, Transport,
};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{MercuryError, ResponderError, Result};

type PendingTable = DashMap<CorrelationId, oneshot::Sender<ReplyOutcome>>;

/// Why a pending reply never arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The deadline passed first
    TimedOut,
    /// The slot was failed, usually because the client disconnected
    Abandoned,
}

/// Table of emits awaiting their reply
#[derive(Clone, Default)]
pub struct Correlator {
    pending: Arc<PendingTable>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a slot for a new emit
    pub fn register(&self) -> PendingReply {
        let id = CorrelationId::new();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        PendingReply {
            id,
            rx,
            pending: Arc::clone(&self.pending),
        }
    }

    /// Deliver `outcome` to the waiter for `id`.
    ///
    /// # Returns
    /// `false` if nobody is waiting, which happens for late or duplicate replies
    pub fn complete(&self, id: CorrelationId, outcome: ReplyOutcome) -> bool {
        match self.pending.remove(&id) {
            Some((_, tx)) => tx.send(outcome).is_ok(),
            None => {
                tracing::debug!("Discarding reply for {} with no pending request", id);
                false
            }
        }
    }

    /// Fail every pending slot; waiters observe [`WaitError::Abandoned`]
    pub fn fail_all(&self) {
        let count = self.pending.len();
        // Dropping the senders wakes the receivers
        self.pending.clear();
        if count > 0 {
            tracing::debug!("Abandoned {} pending replies", count);
        }
    }

    /// Number of emits still waiting for a reply
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

/// A registered slot; removed from the table when dropped.
pub struct PendingReply {
    id: CorrelationId,
    rx: oneshot::Receiver<ReplyOutcome>,
    pending: Arc<PendingTable>,
}

impl PendingReply {
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Wait for the reply until `deadline`
    pub async fn wait(&mut self, deadline: Instant) -> std::result::Result<ReplyOutcome, WaitError> {
        match tokio::time::timeout_at(deadline, &mut self.rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(WaitError::Abandoned),
            Err(_) => Err(WaitError::TimedOut),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// Send one emit over `transport` and wait for its aggregate reply.
///
/// `timeout` is only used to describe a [`MercuryError::Timeout`]; the wait
/// itself is bounded by `deadline`.
pub async fn round_trip(
    correlator: &Correlator,
    transport: &dyn Transport,
    event: &str,
    body: TargetAndPayload,
    deadline: Instant,
    timeout: Duration,
) -> Result<AggregateResponse> {
    let mut pending = correlator.register();
    let frame = OutboundFrame::Emit {
        correlation_id: pending.id(),
        event: event.to_string(),
        body,
    };

    let name = EventName::parse(event);
    tracing::trace!(
        event = name.name(),
        version = name.version().unwrap_or_default(),
        reserved = fqen::is_reserved(event),
        correlation_id = %pending.id(),
        "Emitting event"
    );
    transport.send(frame).await?;

    match pending.wait(deadline).await {
        Ok(Ok(aggregate)) => Ok(aggregate),
        Ok(Err(ReplyError::NoListener { .. })) => Err(MercuryError::NoListener {
            event: event.to_string(),
        }),
        Ok(Err(ReplyError::Rejected(reason))) => Err(MercuryError::Rejected {
            event: event.to_string(),
            reason,
        }),
        Err(WaitError::TimedOut) => {
            tracing::debug!("Timed out waiting on {} ({})", event, pending.id());
            Err(MercuryError::Timeout {
                event: event.to_string(),
                timeout,
            })
        }
        Err(WaitError::Abandoned) => Err(MercuryError::NotConnected),
    }
}

/// Turn an aggregate reply into the ordered list of responder payloads.
///
/// Fails if the totals are inconsistent, if any responder reported errors, or
/// if no responder answered at all.
pub fn unwrap_aggregate(event: &str, aggregate: AggregateResponse) -> Result<Vec<ResponsePayload>> {
    check_aggregate(event, &aggregate)?;
    Ok(aggregate.into_payloads())
}

/// Apply the checks of [`unwrap_aggregate`] without consuming the aggregate
pub fn check_aggregate(event: &str, aggregate: &AggregateResponse) -> Result<()> {
    if !aggregate.is_consistent() {
        let carried: usize = aggregate.responses.iter().map(|r| r.errors.len()).sum();
        return Err(MercuryError::InvalidResponse {
            event: event.to_string(),
            reason: format!(
                "reported {} responses and {} errors but carried {} and {}",
                aggregate.total_responses,
                aggregate.total_errors,
                aggregate.responses.len(),
                carried
            ),
        });
    }

    if aggregate.total_errors > 0 {
        let errors = aggregate
            .failed_responses()
            .map(|r| ResponderError {
                responder_ref: r.responder_ref.clone(),
                errors: r.errors.clone(),
            })
            .collect();
        return Err(MercuryError::AggregatedHandlerError {
            event: event.to_string(),
            total_contracts: aggregate.total_contracts,
            total_responses: aggregate.total_responses,
            errors,
        });
    }

    if aggregate.total_responses == 0 {
        return Err(MercuryError::NoListener {
            event: event.to_string(),
        });
    }

    Ok(())
}
