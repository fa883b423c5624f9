//! Event dispatcher
//!
//! Routes decoded envelopes to handlers through an explicit registration table
//! (event type → handler) and resolves every delivery to a [`Disposition`].
//! There is no annotation or reflection magic: what is registered is what
//! runs.
//!
//! The guard row is written only after the handler has finished, never before:
//! a consumer that dies mid-handling leaves no `processed_events` row, so bus
//! redelivery re-applies the event instead of acking it as a duplicate with
//! the side effect lost. The price is that a crash window can re-run a
//! handler; entity-level transition checks make that re-run a no-op.

use crate::{DeadLetterQueue, IdempotencyGuard};
use async_trait::async_trait;
use event_bus::{BusMessage, EventEnvelope};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Instrument;

/// How a handler run failed.
///
/// The split decides the delivery disposition: transient failures are nacked
/// so the bus redelivers, permanent failures are acked (with a DLQ record)
/// because retrying can never succeed — that is what breaks poison-message
/// loops.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Storage unavailable, deadline overrun — worth redelivering
    #[error("transient: {0}")]
    Transient(String),

    /// Business-rule violation (illegal transition, malformed foreign id) —
    /// retrying will never succeed
    #[error("permanent: {0}")]
    Permanent(String),
}

/// A registered consumer for one event type
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError>;
}

/// Resolution of one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Done with this message (success, duplicate, unknown type, or permanent
    /// failure already dead-lettered)
    Ack,
    /// Transient failure — the bus should redeliver
    Nack,
}

/// Explicit event-type → handler routing with idempotent dispatch
pub struct Dispatcher {
    processor: String,
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    guard: Arc<dyn IdempotencyGuard>,
    dead_letters: Arc<dyn DeadLetterQueue>,
}

impl Dispatcher {
    pub fn new(
        processor: &str,
        guard: Arc<dyn IdempotencyGuard>,
        dead_letters: Arc<dyn DeadLetterQueue>,
    ) -> Self {
        Self {
            processor: processor.to_string(),
            handlers: HashMap::new(),
            guard,
            dead_letters,
        }
    }

    /// Register a handler for an event type. Builder-style so module wiring
    /// reads as a routing table.
    pub fn register(mut self, event_type: &str, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(event_type.to_string(), handler);
        self
    }

    pub fn handles(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Process one raw message and resolve its disposition.
    ///
    /// 1. Malformed envelope → dead-letter, `Ack` (a broken payload must not
    ///    block the channel forever).
    /// 2. No handler for the type → `Ack` (unknown/irrelevant types are not
    ///    errors).
    /// 3. Already-recorded event id → `Ack` without side effects.
    /// 4. Handler `Ok` → guard recorded, `Ack`; permanent failure →
    ///    dead-letter + guard recorded + `Ack`; transient failure → `Nack`
    ///    with nothing recorded, so redelivery reaches the handler again.
    pub async fn dispatch(&self, msg: &BusMessage) -> Disposition {
        let envelope: EventEnvelope = match serde_json::from_slice(&msg.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                let error = format!("failed to decode envelope: {}", e);
                self.dead_letters.push(msg, &error, 0).await;
                return Disposition::Ack;
            }
        };

        let span = tracing::info_span!(
            "dispatch_event",
            processor = %self.processor,
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            subject = %msg.subject,
        );

        self.dispatch_envelope(msg, &envelope).instrument(span).await
    }

    async fn dispatch_envelope(&self, msg: &BusMessage, envelope: &EventEnvelope) -> Disposition {
        let Some(handler) = self.handlers.get(&envelope.event_type) else {
            tracing::debug!("No handler registered for event type, acknowledging");
            return Disposition::Ack;
        };

        let event_id = envelope.event_id.to_string();

        match self.guard.seen(&event_id).await {
            Ok(false) => {}
            Ok(true) => {
                tracing::info!("Duplicate event ignored (already processed)");
                return Disposition::Ack;
            }
            Err(e) => {
                // Guard store down: we cannot prove the event unseen, so let
                // the bus redeliver.
                tracing::warn!(error = %e, "Idempotency guard unavailable, nacking");
                return Disposition::Nack;
            }
        }

        match handler.handle(envelope).await {
            Ok(()) => {
                // Record only now, after the handler's own writes have
                // committed. A crash before this point leaves no guard row
                // and redelivery re-applies the event.
                self.record(&event_id, &envelope.event_type).await;
                tracing::info!("Event processed successfully");
                Disposition::Ack
            }
            Err(HandlerError::Permanent(reason)) => {
                tracing::warn!(reason = %reason, "Permanent handler failure, acknowledging");
                self.dead_letters.push(msg, &reason, 0).await;
                // Recorded so redeliveries ack as duplicates instead of
                // re-failing into the DLQ.
                self.record(&event_id, &envelope.event_type).await;
                Disposition::Ack
            }
            Err(HandlerError::Transient(reason)) => {
                // Nothing was recorded, so the redelivered event reaches the
                // handler again.
                tracing::warn!(reason = %reason, "Transient handler failure, nacking");
                Disposition::Nack
            }
        }
    }

    async fn record(&self, event_id: &str, event_type: &str) {
        match self.guard.check_and_record(event_id, event_type).await {
            // false: a racing worker recorded first; the entity-level
            // transition checks already absorbed the overlap.
            Ok(_) => {}
            Err(e) => {
                // The event is applied but unrecorded. We still ack; should
                // the message somehow come back, transition checks make the
                // re-run a no-op.
                tracing::error!(error = %e, "Failed to record processed event");
            }
        }
    }
}
