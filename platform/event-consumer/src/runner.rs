//! Consumer subscription loop
//!
//! One spawned task per module subscription: pull messages, dispatch, and
//! translate nack dispositions into bounded redelivery. With a core NATS
//! subscription there is no broker-side ack, so the loop itself retries
//! transient failures with backoff and dead-letters what remains — a message
//! is never retried forever and never crashes the process.

use crate::{DeadLetterQueue, Dispatcher, Disposition};
use event_bus::consumer_retry::{retry_with_backoff, RetryConfig};
use event_bus::EventBus;
use futures::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Run a consumer loop until the subscription stream ends.
///
/// Callers spawn this on a task:
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # fn wire(bus: Arc<dyn event_bus::EventBus>, dispatcher: Arc<event_consumer::Dispatcher>,
/// #         dlq: Arc<dyn event_consumer::DeadLetterQueue>) {
/// tokio::spawn(event_consumer::run_consumer(
///     bus,
///     "marketplace.events.>".to_string(),
///     dispatcher,
///     dlq,
///     Default::default(),
/// ));
/// # }
/// ```
pub async fn run_consumer(
    bus: Arc<dyn EventBus>,
    subject: String,
    dispatcher: Arc<Dispatcher>,
    dead_letters: Arc<dyn DeadLetterQueue>,
    retry_config: RetryConfig,
) {
    tracing::info!(subject = %subject, "Starting consumer");

    let mut stream = match bus.subscribe(&subject).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(subject = %subject, error = %e, "Failed to subscribe");
            return;
        }
    };

    tracing::info!(subject = %subject, "Subscribed");

    while let Some(msg) = stream.next().await {
        let result = retry_with_backoff(
            || async {
                // A panic unwinding out of a handler must not kill the
                // consumer task; it is retried like any transient failure.
                match AssertUnwindSafe(dispatcher.dispatch(&msg)).catch_unwind().await {
                    Ok(Disposition::Ack) => Ok(()),
                    Ok(Disposition::Nack) => Err("transient failure, redelivering".to_string()),
                    Err(_) => {
                        tracing::error!(subject = %subject, "Dispatch panicked, retrying");
                        Err("dispatch panicked".to_string())
                    }
                }
            },
            &retry_config,
            &subject,
        )
        .await;

        if result.is_err() {
            dead_letters
                .push(
                    &msg,
                    "retries exhausted on transient failure",
                    retry_config.max_attempts as i32,
                )
                .await;
        }
    }

    tracing::warn!(subject = %subject, "Consumer stopped");
}
