//! Producer-side publishing strategies
//!
//! A producer hands a finished [`EventEnvelope`] to an [`EventPublisher`] and
//! moves on. Publishing is fire-and-forget and fail-open: serialization or
//! transport failures are caught, logged and swallowed so the caller's own
//! transaction is never affected, and no delivery confirmation is returned.
//! This is a deliberate trade-off favoring producer availability over
//! guaranteed delivery.
//!
//! The concrete strategy is selected once at process start by configuration
//! and injected by constructor — there is no per-call branching:
//!
//! - [`BusPublisher`]: serializes and hands straight to the event bus
//! - [`OutboxPublisher`](crate::outbox::OutboxPublisher): stores into the
//!   transactional outbox for the background relay to deliver
//! - [`NoopPublisher`]: logs and performs no I/O (bus disabled)

use crate::{EventBus, EventEnvelope};
use async_trait::async_trait;
use std::sync::Arc;

/// Capability interface for emitting domain events.
///
/// The signature is infallible on purpose: implementations absorb their own
/// failures. Callers must build the envelope once and reuse it on any retry so
/// the event id is never regenerated.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: &EventEnvelope);
}

/// Publishes envelopes directly to an [`EventBus`].
pub struct BusPublisher {
    bus: Arc<dyn EventBus>,
}

impl BusPublisher {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl EventPublisher for BusPublisher {
    async fn publish(&self, envelope: &EventEnvelope) {
        let subject = envelope.subject();

        let payload = match serde_json::to_vec(envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    error = %e,
                    "Failed to serialize event envelope, event dropped"
                );
                return;
            }
        };

        match self.bus.publish(&subject, payload).await {
            Ok(()) => {
                tracing::debug!(
                    event_id = %envelope.event_id,
                    subject = %subject,
                    "Event published"
                );
            }
            Err(e) => {
                // Fail-open: the producing transaction already committed and
                // must not be disturbed by transport trouble.
                tracing::error!(
                    event_id = %envelope.event_id,
                    subject = %subject,
                    error = %e,
                    "Failed to publish event, event dropped"
                );
            }
        }
    }
}

/// Publisher used when the bus is disabled by configuration.
///
/// `publish` only logs and performs no I/O. This is a deliberate capability
/// substitution, not a test-only hack: it keeps the owning service startable
/// and functional in isolation (local development, degraded environments)
/// without special-casing call sites.
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, envelope: &EventEnvelope) {
        tracing::info!(
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            "Event bus disabled, event not published"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{event_types, BusError, BusMessage, BusResult, InMemoryBus, Payload};
    use futures::stream::BoxStream;
    use futures::StreamExt;

    /// Bus double whose publish always fails with a transport error.
    struct FailingBus;

    #[async_trait]
    impl EventBus for FailingBus {
        async fn publish(&self, _subject: &str, _payload: Vec<u8>) -> BusResult<()> {
            Err(BusError::PublishError("connection refused".to_string()))
        }

        async fn subscribe(&self, _subject: &str) -> BusResult<BoxStream<'static, BusMessage>> {
            Err(BusError::SubscribeError("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_bus_publisher_delivers_envelope() {
        let bus = Arc::new(InMemoryBus::new());
        let mut stream = bus.subscribe("marketplace.events.>").await.unwrap();

        let publisher = BusPublisher::new(bus.clone());
        let envelope = EventEnvelope::new(
            event_types::APPOINTMENT_CREATED,
            Payload::new().with("appointmentId", 42i64),
        );

        publisher.publish(&envelope).await;

        let msg = tokio::time::timeout(std::time::Duration::from_secs(1), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");

        assert_eq!(msg.subject, "marketplace.events.APPOINTMENT_CREATED");
        let decoded: EventEnvelope = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(decoded.event_id, envelope.event_id);
    }

    #[tokio::test]
    async fn test_transport_failure_does_not_escape_publish() {
        let publisher = BusPublisher::new(Arc::new(FailingBus));
        let envelope = EventEnvelope::new(event_types::USER_REGISTERED, Payload::new());

        // Must return normally; the caller's commit is unaffected.
        publisher.publish(&envelope).await;
    }

    #[tokio::test]
    async fn test_noop_publisher_performs_no_io() {
        let publisher = NoopPublisher;
        let envelope = EventEnvelope::new(event_types::USER_DELETED, Payload::new());

        publisher.publish(&envelope).await;
    }
}
