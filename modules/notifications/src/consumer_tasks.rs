//! Consumer wiring for the notifications module

use event_bus::consumer_retry::RetryConfig;
use event_bus::{event_types, EventBus, SUBJECT_PREFIX};
use event_consumer::{run_consumer, DeadLetterQueue, Dispatcher, IdempotencyGuard};
use std::sync::Arc;

use crate::handlers::{
    AppointmentCreatedHandler, Notifier, ProviderRepliedHandler, ReviewCreatedHandler,
    ReviewRequestHandler, UserRegisteredHandler,
};
use crate::sender::NotificationSender;
use crate::store::DeliveryStore;

pub const PROCESSOR: &str = "notifications";

pub fn build_dispatcher(
    store: Arc<dyn DeliveryStore>,
    sender: Arc<dyn NotificationSender>,
    guard: Arc<dyn IdempotencyGuard>,
    dead_letters: Arc<dyn DeadLetterQueue>,
) -> Dispatcher {
    let notifier = Arc::new(Notifier::new(store, sender));

    Dispatcher::new(PROCESSOR, guard, dead_letters)
        .register(
            event_types::USER_REGISTERED,
            Arc::new(UserRegisteredHandler::new(notifier.clone())),
        )
        .register(
            event_types::APPOINTMENT_CREATED,
            Arc::new(AppointmentCreatedHandler::new(notifier.clone())),
        )
        .register(
            event_types::REVIEW_REQUEST,
            Arc::new(ReviewRequestHandler::new(notifier.clone())),
        )
        .register(
            event_types::REVIEW_CREATED,
            Arc::new(ReviewCreatedHandler::new(notifier.clone())),
        )
        .register(
            event_types::PROVIDER_REPLIED,
            Arc::new(ProviderRepliedHandler::new(notifier)),
        )
}

pub fn spawn_consumers(
    bus: Arc<dyn EventBus>,
    store: Arc<dyn DeliveryStore>,
    sender: Arc<dyn NotificationSender>,
    guard: Arc<dyn IdempotencyGuard>,
    dead_letters: Arc<dyn DeadLetterQueue>,
) -> tokio::task::JoinHandle<()> {
    let dispatcher = Arc::new(build_dispatcher(store, sender, guard, dead_letters.clone()));

    tokio::spawn(run_consumer(
        bus,
        format!("{}.>", SUBJECT_PREFIX),
        dispatcher,
        dead_letters,
        RetryConfig::default(),
    ))
}
