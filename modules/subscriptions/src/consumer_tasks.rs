//! Consumer wiring for the subscriptions module

use event_bus::consumer_retry::RetryConfig;
use event_bus::{event_types, EventBus, SUBJECT_PREFIX};
use event_consumer::{run_consumer, DeadLetterQueue, Dispatcher, IdempotencyGuard};
use std::sync::Arc;

use crate::handlers::{ProviderRegisteredHandler, UsageAccountingHandler};
use crate::store::SubscriptionStore;

pub const PROCESSOR: &str = "subscriptions";

/// Plan tier assigned to freshly registered providers with no explicit choice
pub const DEFAULT_PLAN_ID: i64 = 1;

pub fn build_dispatcher(
    store: Arc<dyn SubscriptionStore>,
    guard: Arc<dyn IdempotencyGuard>,
    dead_letters: Arc<dyn DeadLetterQueue>,
) -> Dispatcher {
    Dispatcher::new(PROCESSOR, guard, dead_letters)
        .register(
            event_types::APPOINTMENT_COMPLETED,
            Arc::new(UsageAccountingHandler::new(store.clone())),
        )
        .register(
            event_types::USER_REGISTERED,
            Arc::new(ProviderRegisteredHandler::new(store, DEFAULT_PLAN_ID)),
        )
}

pub fn spawn_consumers(
    bus: Arc<dyn EventBus>,
    store: Arc<dyn SubscriptionStore>,
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
