//! Event handlers driving outbound notifications
//!
//! Every consumed event becomes one PENDING delivery row which is then handed
//! to the sender. A send failure is not a handler failure: the row is marked
//! FAILED and the retry sweep owns it from there, so the bus sees an ack and
//! the dedup guard keeps the event from ever minting a second delivery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::EventEnvelope;
use event_consumer::{EventHandler, HandlerError};
use std::sync::Arc;

use crate::models::NotificationKind;
use crate::sender::NotificationSender;
use crate::store::{DeliveryStore, StoreError};

fn store_failure(e: StoreError) -> HandlerError {
    match e {
        StoreError::Unavailable(reason) => HandlerError::Transient(reason),
        other => HandlerError::Permanent(other.to_string()),
    }
}

/// Shared create-and-send flow behind every notification handler
pub struct Notifier {
    store: Arc<dyn DeliveryStore>,
    sender: Arc<dyn NotificationSender>,
}

impl Notifier {
    pub fn new(store: Arc<dyn DeliveryStore>, sender: Arc<dyn NotificationSender>) -> Self {
        Self { store, sender }
    }

    pub async fn notify(
        &self,
        kind: NotificationKind,
        recipient_user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), HandlerError> {
        let delivery = self
            .store
            .create(kind, recipient_user_id, now)
            .await
            .map_err(store_failure)?;

        match self.sender.send(&delivery).await {
            Ok(provider_message_id) => {
                self.store
                    .mark_sent(delivery.id, &provider_message_id, now)
                    .await
                    .map_err(store_failure)?;
                tracing::info!(
                    delivery_id = delivery.id,
                    kind = kind.as_str(),
                    recipient_user_id,
                    "Notification sent"
                );
            }
            Err(e) => {
                // The delivery row exists; the retry sweep takes over.
                tracing::warn!(
                    delivery_id = delivery.id,
                    kind = kind.as_str(),
                    error = %e,
                    "Send failed, delivery marked for retry"
                );
                self.store
                    .mark_failed(delivery.id, now)
                    .await
                    .map_err(store_failure)?;
            }
        }

        Ok(())
    }
}

fn user_recipient(envelope: &EventEnvelope) -> Result<i64, HandlerError> {
    match envelope.source_user_id {
        Some(id) => Ok(id),
        None => envelope
            .payload
            .get_i64("userId")
            .map_err(|e| HandlerError::Permanent(e.to_string())),
    }
}

fn provider_recipient(envelope: &EventEnvelope) -> Result<i64, HandlerError> {
    match envelope.source_provider_id {
        Some(id) => Ok(id),
        None => envelope
            .payload
            .get_i64("providerId")
            .map_err(|e| HandlerError::Permanent(e.to_string())),
    }
}

/// `USER_REGISTERED` → welcome message to the new user
pub struct UserRegisteredHandler {
    notifier: Arc<Notifier>,
}

impl UserRegisteredHandler {
    pub fn new(notifier: Arc<Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl EventHandler for UserRegisteredHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let recipient = user_recipient(envelope)?;
        self.notifier
            .notify(NotificationKind::Welcome, recipient, envelope.timestamp)
            .await
    }
}

/// `APPOINTMENT_CREATED` → booking confirmation to the patient
pub struct AppointmentCreatedHandler {
    notifier: Arc<Notifier>,
}

impl AppointmentCreatedHandler {
    pub fn new(notifier: Arc<Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl EventHandler for AppointmentCreatedHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let recipient = user_recipient(envelope)?;
        self.notifier
            .notify(
                NotificationKind::AppointmentConfirmation,
                recipient,
                envelope.timestamp,
            )
            .await
    }
}

/// `REVIEW_REQUEST` → ask the patient to review their completed visit
pub struct ReviewRequestHandler {
    notifier: Arc<Notifier>,
}

impl ReviewRequestHandler {
    pub fn new(notifier: Arc<Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl EventHandler for ReviewRequestHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let recipient = user_recipient(envelope)?;
        self.notifier
            .notify(NotificationKind::ReviewRequest, recipient, envelope.timestamp)
            .await
    }
}

/// `REVIEW_CREATED` → alert the reviewed provider
pub struct ReviewCreatedHandler {
    notifier: Arc<Notifier>,
}

impl ReviewCreatedHandler {
    pub fn new(notifier: Arc<Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl EventHandler for ReviewCreatedHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let recipient = provider_recipient(envelope)?;
        self.notifier
            .notify(NotificationKind::ReviewAlert, recipient, envelope.timestamp)
            .await
    }
}

/// `PROVIDER_REPLIED` → alert the patient whose review got a reply
pub struct ProviderRepliedHandler {
    notifier: Arc<Notifier>,
}

impl ProviderRepliedHandler {
    pub fn new(notifier: Arc<Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl EventHandler for ProviderRepliedHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let recipient = user_recipient(envelope)?;
        self.notifier
            .notify(
                NotificationKind::ProviderReplyAlert,
                recipient,
                envelope.timestamp,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::DeliveryStatus;
    use crate::sender::test_support::FlakySender;
    use crate::sender::LoggingSender;
    use crate::store::InMemoryDeliveryStore;
    use event_bus::{event_types, Payload};

    fn notifier_with(
        store: Arc<InMemoryDeliveryStore>,
        sender: Arc<dyn NotificationSender>,
    ) -> Arc<Notifier> {
        Arc::new(Notifier::new(store, sender))
    }

    #[tokio::test]
    async fn test_registration_sends_welcome() {
        let store = Arc::new(InMemoryDeliveryStore::new());
        let handler = UserRegisteredHandler::new(notifier_with(
            store.clone(),
            Arc::new(LoggingSender),
        ));

        let event = EventEnvelope::new(event_types::USER_REGISTERED, Payload::new())
            .with_source_user(10);
        handler.handle(&event).await.unwrap();

        let delivery = store.get(1).await.unwrap();
        assert_eq!(delivery.kind, NotificationKind::Welcome);
        assert_eq!(delivery.recipient_user_id, 10);
        assert_eq!(delivery.status, DeliveryStatus::Sent);
        assert!(delivery.provider_message_id.is_some());
    }

    #[tokio::test]
    async fn test_send_failure_marks_failed_but_acks() {
        let store = Arc::new(InMemoryDeliveryStore::new());
        let sender = Arc::new(FlakySender::failing_first(usize::MAX));
        let handler =
            UserRegisteredHandler::new(notifier_with(store.clone(), sender));

        let event = EventEnvelope::new(event_types::USER_REGISTERED, Payload::new())
            .with_source_user(10);
        handler.handle(&event).await.unwrap();

        let delivery = store.get(1).await.unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Failed);
        assert_eq!(delivery.retry_count, 1);
    }

    #[tokio::test]
    async fn test_missing_recipient_is_permanent() {
        let store = Arc::new(InMemoryDeliveryStore::new());
        let handler = UserRegisteredHandler::new(notifier_with(
            store.clone(),
            Arc::new(LoggingSender),
        ));

        let event = EventEnvelope::new(event_types::USER_REGISTERED, Payload::new());
        let err = handler.handle(&event).await.unwrap_err();
        assert!(matches!(err, HandlerError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_review_created_alerts_provider() {
        let store = Arc::new(InMemoryDeliveryStore::new());
        let handler = ReviewCreatedHandler::new(notifier_with(
            store.clone(),
            Arc::new(LoggingSender),
        ));

        let event = EventEnvelope::new(
            event_types::REVIEW_CREATED,
            Payload::new().with("rating", 5i64),
        )
        .with_source_user(10)
        .with_source_provider(500);
        handler.handle(&event).await.unwrap();

        let delivery = store.get(1).await.unwrap();
        assert_eq!(delivery.kind, NotificationKind::ReviewAlert);
        assert_eq!(delivery.recipient_user_id, 500);
    }
}
