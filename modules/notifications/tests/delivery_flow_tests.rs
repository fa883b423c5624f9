//! End-to-end dispatch tests for the notifications consumer: duplicate-safe
//! welcome sends, send failures handed to the retry sweep, and settled
//! deliveries left alone.

use chrono::Utc;
use event_bus::{event_types, BusMessage, EventEnvelope, Payload};
use event_consumer::{Dispatcher, Disposition, InMemoryDeadLetterQueue, InMemoryGuard};
use notifications_rs::consumer_tasks::build_dispatcher;
use notifications_rs::retry::sweep_once;
use notifications_rs::sender::test_support::FlakySender;
use notifications_rs::sender::{LoggingSender, NotificationSender};
use notifications_rs::store::{DeliveryOutcome, DeliveryStore, InMemoryDeliveryStore, StoreError};
use notifications_rs::{DeliveryStatus, NotificationKind};
use std::sync::Arc;

struct Harness {
    store: Arc<dyn DeliveryStore>,
    sender: Arc<dyn NotificationSender>,
    dispatcher: Dispatcher,
    dlq: Arc<InMemoryDeadLetterQueue>,
}

fn harness(sender: Arc<dyn NotificationSender>) -> Harness {
    let store: Arc<dyn DeliveryStore> = Arc::new(InMemoryDeliveryStore::new());
    let dlq = Arc::new(InMemoryDeadLetterQueue::new());

    let dispatcher = build_dispatcher(
        store.clone(),
        sender.clone(),
        Arc::new(InMemoryGuard::new()),
        dlq.clone(),
    );

    Harness {
        store,
        sender,
        dispatcher,
        dlq,
    }
}

fn message_for(envelope: &EventEnvelope) -> BusMessage {
    BusMessage::new(envelope.subject(), serde_json::to_vec(envelope).unwrap())
}

#[tokio::test]
async fn test_registration_delivered_three_times_sends_one_welcome() {
    let h = harness(Arc::new(LoggingSender));

    let event = EventEnvelope::new(event_types::USER_REGISTERED, Payload::new())
        .with_source_user(10);
    let msg = message_for(&event);

    // At-least-once delivery: the same message arrives three times.
    for _ in 0..3 {
        assert_eq!(h.dispatcher.dispatch(&msg).await, Disposition::Ack);
    }

    let delivery = h.store.get(1).await.unwrap();
    assert_eq!(delivery.kind, NotificationKind::Welcome);
    assert_eq!(delivery.recipient_user_id, 10);
    assert_eq!(delivery.status, DeliveryStatus::Sent);

    assert!(
        matches!(h.store.get(2).await, Err(StoreError::NotFound(_))),
        "exactly one delivery per registration"
    );
    assert!(h.dlq.is_empty());
}

#[tokio::test]
async fn test_send_failure_is_acked_then_recovered_by_sweep() {
    let sender = Arc::new(FlakySender::failing_first(1));
    let h = harness(sender.clone());

    let event = EventEnvelope::new(event_types::APPOINTMENT_CREATED, Payload::new())
        .with_source_user(10);

    // The send fails but the event is still acked; the delivery row carries
    // the failure.
    assert_eq!(
        h.dispatcher.dispatch(&message_for(&event)).await,
        Disposition::Ack
    );
    let delivery = h.store.get(1).await.unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert_eq!(delivery.retry_count, 1);
    assert!(h.dlq.is_empty());

    // The sweep picks it up and the second send succeeds.
    assert_eq!(sweep_once(&h.store, &h.sender, 3).await.unwrap(), 1);
    let delivery = h.store.get(1).await.unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Sent);
    assert!(delivery.provider_message_id.is_some());
    assert_eq!(sender.call_count(), 2);
}

#[tokio::test]
async fn test_settled_deliveries_are_left_alone_by_the_sweep() {
    let h = harness(Arc::new(LoggingSender));
    let now = Utc::now();

    let event = EventEnvelope::new(event_types::USER_REGISTERED, Payload::new())
        .with_source_user(10);
    assert_eq!(
        h.dispatcher.dispatch(&message_for(&event)).await,
        Disposition::Ack
    );

    let sent = h.store.get(1).await.unwrap();
    let provider_message_id = sent.provider_message_id.clone().unwrap();
    h.store
        .apply_outcome(&provider_message_id, DeliveryOutcome::Bounced, now)
        .await
        .unwrap();

    assert_eq!(sweep_once(&h.store, &h.sender, 3).await.unwrap(), 0);
    assert_eq!(
        h.store.get(1).await.unwrap().status,
        DeliveryStatus::Bounced
    );
}

#[tokio::test]
async fn test_unknown_event_type_flows_past_the_module() {
    let h = harness(Arc::new(LoggingSender));

    let event = EventEnvelope::new(event_types::ITEM_UPDATED, Payload::new());
    assert_eq!(
        h.dispatcher.dispatch(&message_for(&event)).await,
        Disposition::Ack
    );
    assert!(
        matches!(h.store.get(1).await, Err(StoreError::NotFound(_))),
        "no delivery minted for unhandled events"
    );
    assert!(h.dlq.is_empty());
}
