//! Periodic retry sweep
//!
//! Requeues FAILED deliveries still under the attempt ceiling and re-sends
//! them. Deliveries that fail again go back to FAILED with a higher
//! `retry_count`; once the ceiling is reached the sweep stops picking them up
//! and FAILED becomes final.

use std::sync::Arc;
use std::time::Duration;

use crate::sender::NotificationSender;
use crate::store::DeliveryStore;

#[derive(Debug, Clone, Copy)]
pub struct RetrySweepConfig {
    pub interval: Duration,
    pub max_attempts: i32,
}

impl Default for RetrySweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_attempts: 3,
        }
    }
}

/// Run the sweep loop forever. Spawned by the module binary.
pub async fn run_retry_sweep(
    store: Arc<dyn DeliveryStore>,
    sender: Arc<dyn NotificationSender>,
    config: RetrySweepConfig,
) {
    tracing::info!(
        max_attempts = config.max_attempts,
        "Starting delivery retry sweep"
    );

    let mut interval = tokio::time::interval(config.interval);

    loop {
        interval.tick().await;

        match sweep_once(&store, &sender, config.max_attempts).await {
            Ok(0) => {}
            Ok(count) => tracing::info!(count, "Retried failed deliveries"),
            Err(e) => tracing::error!(error = %e, "Retry sweep failed"),
        }
    }
}

/// One pass: requeue what is retryable and re-send it. Returns the number of
/// deliveries attempted.
pub async fn sweep_once(
    store: &Arc<dyn DeliveryStore>,
    sender: &Arc<dyn NotificationSender>,
    max_attempts: i32,
) -> Result<usize, crate::store::StoreError> {
    let now = chrono::Utc::now();
    let requeued = store.requeue_failed(max_attempts, now).await?;
    let attempted = requeued.len();

    for delivery in requeued {
        match sender.send(&delivery).await {
            Ok(provider_message_id) => {
                store
                    .mark_sent(delivery.id, &provider_message_id, now)
                    .await?;
                tracing::info!(delivery_id = delivery.id, "Delivery retried successfully");
            }
            Err(e) => {
                store.mark_failed(delivery.id, now).await?;
                tracing::warn!(
                    delivery_id = delivery.id,
                    error = %e,
                    "Delivery retry failed"
                );
            }
        }
    }

    Ok(attempted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::DeliveryStatus;
    use crate::models::NotificationKind;
    use crate::sender::test_support::FlakySender;
    use crate::store::InMemoryDeliveryStore;
    use chrono::Utc;

    #[tokio::test]
    async fn test_sweep_recovers_failed_delivery() {
        let store: Arc<dyn DeliveryStore> = Arc::new(InMemoryDeliveryStore::new());
        let now = Utc::now();

        let delivery = store
            .create(NotificationKind::Welcome, 10, now)
            .await
            .unwrap();
        store.mark_failed(delivery.id, now).await.unwrap();

        let sender: Arc<dyn NotificationSender> = Arc::new(FlakySender::failing_first(0));
        let attempted = sweep_once(&store, &sender, 3).await.unwrap();

        assert_eq!(attempted, 1);
        let delivery = store.get(delivery.id).await.unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Sent);
        assert!(delivery.provider_message_id.is_some());
    }

    #[tokio::test]
    async fn test_sweep_gives_up_at_attempt_ceiling() {
        let store: Arc<dyn DeliveryStore> = Arc::new(InMemoryDeliveryStore::new());
        let sender: Arc<dyn NotificationSender> =
            Arc::new(FlakySender::failing_first(usize::MAX));
        let now = Utc::now();

        let delivery = store
            .create(NotificationKind::Welcome, 10, now)
            .await
            .unwrap();
        store.mark_failed(delivery.id, now).await.unwrap();

        // Sweeps keep failing until retry_count hits the ceiling, after which
        // the delivery is left alone.
        assert_eq!(sweep_once(&store, &sender, 3).await.unwrap(), 1);
        assert_eq!(sweep_once(&store, &sender, 3).await.unwrap(), 1);
        assert_eq!(sweep_once(&store, &sender, 3).await.unwrap(), 0);

        let delivery = store.get(delivery.id).await.unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Failed);
        assert_eq!(delivery.retry_count, 3);
    }
}
