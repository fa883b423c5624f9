//! Dispatch tests for the onboarding projection: lazy creation, the
//! never-overwrite guarantee, and catalog completion via listings.

use chrono::Utc;
use event_bus::{event_types, BusMessage, EventEnvelope, Payload};
use event_consumer::{Dispatcher, Disposition, InMemoryDeadLetterQueue, InMemoryGuard};
use onboarding_rs::consumer_tasks::build_dispatcher;
use onboarding_rs::{ChecklistStore, InMemoryChecklistStore, StepKind, StepStatus};
use std::sync::Arc;

fn message_for(envelope: &EventEnvelope) -> BusMessage {
    BusMessage::new(envelope.subject(), serde_json::to_vec(envelope).unwrap())
}

fn dispatcher_for(store: Arc<InMemoryChecklistStore>) -> Dispatcher {
    build_dispatcher(
        store,
        Arc::new(InMemoryGuard::new()),
        Arc::new(InMemoryDeadLetterQueue::new()),
    )
}

#[tokio::test]
async fn test_registration_then_listing_completes_catalog() {
    let store = Arc::new(InMemoryChecklistStore::new());
    let dispatcher = dispatcher_for(store.clone());

    let registered = EventEnvelope::new(
        event_types::USER_REGISTERED,
        Payload::new().with("role", "PROVIDER").with("planId", "5"),
    )
    .with_source_provider(500);
    assert_eq!(
        dispatcher.dispatch(&message_for(&registered)).await,
        Disposition::Ack
    );

    let listed = EventEnvelope::new(
        event_types::ITEM_CREATED,
        Payload::new().with("itemId", 1i64),
    )
    .with_source_provider(500);
    assert_eq!(
        dispatcher.dispatch(&message_for(&listed)).await,
        Disposition::Ack
    );

    let checklist = store.get(500).await.unwrap().unwrap();
    assert_eq!(checklist.selected_plan_id, Some(5));
    assert_eq!(
        checklist.step_status(StepKind::ServiceCatalog),
        Some(StepStatus::Completed)
    );
    assert!(checklist.has_blocking_steps(), "other steps still pending");
}

#[tokio::test]
async fn test_duplicate_registration_leaves_checklist_untouched() {
    let store = Arc::new(InMemoryChecklistStore::new());
    let dispatcher = dispatcher_for(store.clone());

    let registered = EventEnvelope::new(
        event_types::USER_REGISTERED,
        Payload::new().with("role", "PROVIDER").with("planId", 3i64),
    )
    .with_source_provider(500);
    let msg = message_for(&registered);

    assert_eq!(dispatcher.dispatch(&msg).await, Disposition::Ack);

    // Progress a step, then redeliver the same message and a second logical
    // registration for the same provider.
    store
        .approve_step_if_open(500, StepKind::ProfileDetails, Utc::now())
        .await
        .unwrap();

    assert_eq!(dispatcher.dispatch(&msg).await, Disposition::Ack);

    let second = EventEnvelope::new(
        event_types::USER_REGISTERED,
        Payload::new().with("role", "PROVIDER").with("planId", 9i64),
    )
    .with_source_provider(500);
    assert_eq!(
        dispatcher.dispatch(&message_for(&second)).await,
        Disposition::Ack
    );

    let checklist = store.get(500).await.unwrap().unwrap();
    assert_eq!(checklist.selected_plan_id, Some(3));
    assert_eq!(
        checklist.step_status(StepKind::ProfileDetails),
        Some(StepStatus::Completed)
    );
}

#[tokio::test]
async fn test_deletion_removes_checklist() {
    let store = Arc::new(InMemoryChecklistStore::new());
    store
        .create_if_absent(500, None, Utc::now())
        .await
        .unwrap();
    let dispatcher = dispatcher_for(store.clone());

    let deleted = EventEnvelope::new(event_types::USER_DELETED, Payload::new())
        .with_source_provider(500);
    assert_eq!(
        dispatcher.dispatch(&message_for(&deleted)).await,
        Disposition::Ack
    );

    assert!(store.get(500).await.unwrap().is_none());
}

#[tokio::test]
async fn test_plan_downgrade_is_projected() {
    let store = Arc::new(InMemoryChecklistStore::new());
    store
        .create_if_absent(500, Some(3), Utc::now())
        .await
        .unwrap();
    let dispatcher = dispatcher_for(store.clone());

    let downgraded = EventEnvelope::new(
        event_types::PLAN_DOWNGRADED,
        Payload::new().with("providerId", 500i64).with("planId", 1i64),
    )
    .with_source_provider(500);
    assert_eq!(
        dispatcher.dispatch(&message_for(&downgraded)).await,
        Disposition::Ack
    );

    assert_eq!(
        store.get(500).await.unwrap().unwrap().selected_plan_id,
        Some(1)
    );
}
