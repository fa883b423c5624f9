//! Event handlers for the subscriptions consumer

use async_trait::async_trait;
use event_bus::EventEnvelope;
use event_consumer::{EventHandler, HandlerError};
use std::sync::Arc;

use crate::store::{StoreError, SubscriptionStore};

fn store_failure(e: StoreError) -> HandlerError {
    match e {
        StoreError::Unavailable(reason) => HandlerError::Transient(reason),
        other => HandlerError::Permanent(other.to_string()),
    }
}

/// `APPOINTMENT_COMPLETED`: count the visit against the provider's plan.
///
/// Dispatch-level dedup guarantees a redelivered completion event cannot
/// double-count; a provider without a subscription row is a permanent skip.
pub struct UsageAccountingHandler {
    store: Arc<dyn SubscriptionStore>,
}

impl UsageAccountingHandler {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for UsageAccountingHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let provider_id = match envelope.source_provider_id {
            Some(id) => id,
            None => envelope
                .payload
                .get_i64("providerId")
                .map_err(|e| HandlerError::Permanent(e.to_string()))?,
        };

        let used = self
            .store
            .increment_usage(provider_id)
            .await
            .map_err(store_failure)?;

        tracing::info!(provider_id, appointments_used = used, "Usage recorded");
        Ok(())
    }
}

/// `USER_REGISTERED` with `role=PROVIDER`: lazily create the INCOMPLETE
/// subscription shell. Other roles and existing shells are no-ops.
pub struct ProviderRegisteredHandler {
    store: Arc<dyn SubscriptionStore>,
    default_plan_id: i64,
}

impl ProviderRegisteredHandler {
    pub fn new(store: Arc<dyn SubscriptionStore>, default_plan_id: i64) -> Self {
        Self {
            store,
            default_plan_id,
        }
    }
}

#[async_trait]
impl EventHandler for ProviderRegisteredHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let role = envelope
            .payload
            .get_str_opt("role")
            .map_err(|e| HandlerError::Permanent(e.to_string()))?;
        if role != Some("PROVIDER") {
            return Ok(());
        }

        let provider_id = match envelope.source_provider_id {
            Some(id) => id,
            None => envelope
                .payload
                .get_i64("providerId")
                .map_err(|e| HandlerError::Permanent(e.to_string()))?,
        };

        let plan_id = envelope
            .payload
            .get_i64_opt("planId")
            .map_err(|e| HandlerError::Permanent(e.to_string()))?
            .unwrap_or(self.default_plan_id);

        let created = self
            .store
            .create_shell_if_absent(provider_id, plan_id)
            .await
            .map_err(store_failure)?;

        if created {
            tracing::info!(provider_id, plan_id, "Subscription shell created");
        } else {
            tracing::debug!(provider_id, "Subscription shell already exists");
        }
        Ok(())
    }
}
