//! Consumer wiring for the appointments module
//!
//! One subscription to `marketplace.events.>`, routed through an explicit
//! registration table. Everything the module reacts to is listed here.

use event_bus::consumer_retry::RetryConfig;
use event_bus::{event_types, EventBus, EventPublisher, SUBJECT_PREFIX};
use event_consumer::{run_consumer, DeadLetterQueue, Dispatcher, IdempotencyGuard};
use std::sync::Arc;

use crate::handlers::{AppointmentCanceledHandler, AppointmentCompletedHandler, UserDeletedHandler};
use crate::store::AppointmentStore;

pub const PROCESSOR: &str = "appointments";

/// Build the module's dispatcher with its full handler table.
pub fn build_dispatcher(
    store: Arc<dyn AppointmentStore>,
    publisher: Arc<dyn EventPublisher>,
    guard: Arc<dyn IdempotencyGuard>,
    dead_letters: Arc<dyn DeadLetterQueue>,
) -> Dispatcher {
    Dispatcher::new(PROCESSOR, guard, dead_letters)
        .register(
            event_types::APPOINTMENT_COMPLETED,
            Arc::new(AppointmentCompletedHandler::new(store.clone(), publisher)),
        )
        .register(
            event_types::APPOINTMENT_CANCELED,
            Arc::new(AppointmentCanceledHandler::new(store.clone())),
        )
        .register(
            event_types::USER_DELETED,
            Arc::new(UserDeletedHandler::new(store)),
        )
}

/// Spawn the consumer loop for this module.
pub fn spawn_consumers(
    bus: Arc<dyn EventBus>,
    store: Arc<dyn AppointmentStore>,
    publisher: Arc<dyn EventPublisher>,
    guard: Arc<dyn IdempotencyGuard>,
    dead_letters: Arc<dyn DeadLetterQueue>,
) -> tokio::task::JoinHandle<()> {
    let dispatcher = Arc::new(build_dispatcher(
        store,
        publisher,
        guard,
        dead_letters.clone(),
    ));

    tokio::spawn(run_consumer(
        bus,
        format!("{}.>", SUBJECT_PREFIX),
        dispatcher,
        dead_letters,
        RetryConfig::default(),
    ))
}
