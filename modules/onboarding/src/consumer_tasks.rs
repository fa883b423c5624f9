//! Consumer wiring for the onboarding module

use event_bus::consumer_retry::RetryConfig;
use event_bus::{event_types, EventBus, SUBJECT_PREFIX};
use event_consumer::{run_consumer, DeadLetterQueue, Dispatcher, IdempotencyGuard};
use std::sync::Arc;

use crate::handlers::{
    ItemCreatedHandler, PlanDowngradedHandler, ProviderRegisteredHandler, UserDeletedHandler,
};
use crate::store::ChecklistStore;

pub const PROCESSOR: &str = "onboarding";

pub fn build_dispatcher(
    store: Arc<dyn ChecklistStore>,
    guard: Arc<dyn IdempotencyGuard>,
    dead_letters: Arc<dyn DeadLetterQueue>,
) -> Dispatcher {
    Dispatcher::new(PROCESSOR, guard, dead_letters)
        .register(
            event_types::USER_REGISTERED,
            Arc::new(ProviderRegisteredHandler::new(store.clone())),
        )
        .register(
            event_types::PLAN_DOWNGRADED,
            Arc::new(PlanDowngradedHandler::new(store.clone())),
        )
        .register(
            event_types::ITEM_CREATED,
            Arc::new(ItemCreatedHandler::new(store.clone())),
        )
        .register(
            event_types::USER_DELETED,
            Arc::new(UserDeletedHandler::new(store)),
        )
}

pub fn spawn_consumers(
    bus: Arc<dyn EventBus>,
    store: Arc<dyn ChecklistStore>,
    guard: Arc<dyn IdempotencyGuard>,
    dead_letters: Arc<dyn DeadLetterQueue>,
) -> tokio::task::JoinHandle<()> {
    let dispatcher = Arc::new(build_dispatcher(store, guard, dead_letters.clone()));

    tokio::spawn(run_consumer(
        bus,
        format!("{}.>", SUBJECT_PREFIX),
        dispatcher,
        dead_letters,
        RetryConfig::default(),
    ))
}
