//! Outbound send capability
//!
//! Real email/SMS provider clients sit behind this trait; the logging
//! implementation stands in for them so the module runs end to end without
//! external credentials.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::NotificationDelivery;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("delivery provider rejected the message: {0}")]
    Rejected(String),

    #[error("delivery provider unreachable: {0}")]
    Unreachable(String),
}

/// Hand a delivery to the provider; returns the provider-assigned message id.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, delivery: &NotificationDelivery) -> Result<String, SendError>;
}

/// Sender that logs instead of calling a provider (dev/test, degraded mode)
pub struct LoggingSender;

#[async_trait]
impl NotificationSender for LoggingSender {
    async fn send(&self, delivery: &NotificationDelivery) -> Result<String, SendError> {
        let provider_message_id = format!("log-{}", Uuid::new_v4());
        tracing::info!(
            delivery_id = delivery.id,
            kind = delivery.kind.as_str(),
            recipient_user_id = delivery.recipient_user_id,
            provider_message_id = %provider_message_id,
            "Notification sent (logging sender)"
        );
        Ok(provider_message_id)
    }
}

/// Sender doubles shared by unit and integration tests.
pub mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sender double that fails its first N sends, then succeeds.
    pub struct FlakySender {
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl FlakySender {
        pub fn failing_first(fail_first: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first,
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NotificationSender for FlakySender {
        async fn send(&self, delivery: &NotificationDelivery) -> Result<String, SendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(SendError::Unreachable("connection refused".to_string()))
            } else {
                Ok(format!("msg-{}-{}", delivery.id, n))
            }
        }
    }
}
