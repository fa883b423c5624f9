//! Event handlers projecting marketplace events onto onboarding checklists

use async_trait::async_trait;
use event_bus::{EventEnvelope, PayloadError};
use event_consumer::{EventHandler, HandlerError};
use std::sync::Arc;

use crate::models::StepKind;
use crate::store::{ChecklistStore, StoreError};

fn store_failure(e: StoreError) -> HandlerError {
    match e {
        StoreError::Unavailable(reason) => HandlerError::Transient(reason),
        other => HandlerError::Permanent(other.to_string()),
    }
}

fn payload_failure(e: PayloadError) -> HandlerError {
    HandlerError::Permanent(e.to_string())
}

fn provider_id_from(envelope: &EventEnvelope) -> Result<i64, HandlerError> {
    match envelope.source_provider_id {
        Some(id) => Ok(id),
        None => envelope.payload.get_i64("providerId").map_err(payload_failure),
    }
}

/// `USER_REGISTERED` with `role=PROVIDER`: lazily create the checklist.
///
/// `planId` may arrive as a number or a numeric string, or not at all. An
/// existing checklist is never overwritten, so a redelivered registration
/// event cannot reset a provider's progress.
pub struct ProviderRegisteredHandler {
    store: Arc<dyn ChecklistStore>,
}

impl ProviderRegisteredHandler {
    pub fn new(store: Arc<dyn ChecklistStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for ProviderRegisteredHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let role = envelope
            .payload
            .get_str_opt("role")
            .map_err(payload_failure)?;
        if role != Some("PROVIDER") {
            return Ok(());
        }

        let provider_id = provider_id_from(envelope)?;
        let plan_id = envelope
            .payload
            .get_i64_opt("planId")
            .map_err(payload_failure)?;

        let created = self
            .store
            .create_if_absent(provider_id, plan_id, envelope.timestamp)
            .await
            .map_err(store_failure)?;

        if created {
            tracing::info!(provider_id, ?plan_id, "Onboarding checklist created");
        } else {
            tracing::debug!(provider_id, "Checklist already exists, left untouched");
        }
        Ok(())
    }
}

/// `PLAN_DOWNGRADED`: record the new plan on the checklist.
pub struct PlanDowngradedHandler {
    store: Arc<dyn ChecklistStore>,
}

impl PlanDowngradedHandler {
    pub fn new(store: Arc<dyn ChecklistStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for PlanDowngradedHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let provider_id = provider_id_from(envelope)?;
        let plan_id = envelope.payload.get_i64("planId").map_err(payload_failure)?;

        match self.store.set_plan(provider_id, plan_id).await {
            Ok(()) => {
                tracing::info!(provider_id, plan_id, "Checklist plan updated");
                Ok(())
            }
            // Providers without a checklist have nothing to project onto.
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(provider_id, "No checklist for downgraded provider");
                Ok(())
            }
            Err(e) => Err(store_failure(e)),
        }
    }
}

/// `ITEM_CREATED`: the provider's first listing completes catalog setup.
///
/// Late or duplicate events that find the step already terminal are no-ops.
pub struct ItemCreatedHandler {
    store: Arc<dyn ChecklistStore>,
}

impl ItemCreatedHandler {
    pub fn new(store: Arc<dyn ChecklistStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for ItemCreatedHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let provider_id = provider_id_from(envelope)?;

        match self
            .store
            .approve_step_if_open(provider_id, StepKind::ServiceCatalog, envelope.timestamp)
            .await
        {
            Ok(true) => {
                tracing::info!(provider_id, "Service catalog step completed");
                Ok(())
            }
            Ok(false) => {
                tracing::debug!(provider_id, "Service catalog step already settled");
                Ok(())
            }
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(provider_id, "No checklist for listing provider");
                Ok(())
            }
            Err(e) => Err(store_failure(e)),
        }
    }
}

/// `USER_DELETED`: drop the provider's checklist along with the account.
pub struct UserDeletedHandler {
    store: Arc<dyn ChecklistStore>,
}

impl UserDeletedHandler {
    pub fn new(store: Arc<dyn ChecklistStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for UserDeletedHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        // Patient deletions carry no provider id; nothing to remove here.
        let Some(provider_id) = envelope.source_provider_id else {
            return Ok(());
        };

        let removed = self
            .store
            .remove(provider_id)
            .await
            .map_err(store_failure)?;

        if removed {
            tracing::info!(provider_id, "Onboarding checklist removed");
        }
        Ok(())
    }
}
