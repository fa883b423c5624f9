//! Event handlers for the appointments consumer
//!
//! Handlers translate marketplace events into lifecycle transitions. The error
//! mapping is uniform: a missing or malformed payload field and an illegal
//! transition are permanent (retrying cannot fix them), a storage outage is
//! transient.

use async_trait::async_trait;
use event_bus::{event_types, EventEnvelope, EventPublisher, Payload, PayloadError};
use event_consumer::{EventHandler, HandlerError};
use std::sync::Arc;

use crate::lifecycle::AppointmentTransition;
use crate::store::{AppointmentStore, StoreError};

fn store_failure(e: StoreError) -> HandlerError {
    match e {
        StoreError::Unavailable(reason) => HandlerError::Transient(reason),
        other => HandlerError::Permanent(other.to_string()),
    }
}

fn payload_failure(e: PayloadError) -> HandlerError {
    HandlerError::Permanent(e.to_string())
}

/// `APPOINTMENT_COMPLETED`: close out the visit and ask the patient for a
/// review.
///
/// The review request is published only after the transition commits, so a
/// visit that cannot legally complete (already canceled, never started) asks
/// for nothing. Dispatch-level dedup makes the request at-most-once per
/// completion event.
pub struct AppointmentCompletedHandler {
    store: Arc<dyn AppointmentStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl AppointmentCompletedHandler {
    pub fn new(store: Arc<dyn AppointmentStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, publisher }
    }
}

#[async_trait]
impl EventHandler for AppointmentCompletedHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let appointment_id = envelope
            .payload
            .get_i64("appointmentId")
            .map_err(payload_failure)?;

        let appointment = self
            .store
            .apply(
                appointment_id,
                AppointmentTransition::Complete,
                envelope.timestamp,
            )
            .await
            .map_err(store_failure)?;

        tracing::info!(appointment_id, "Appointment completed");

        let request = EventEnvelope::new(
            event_types::REVIEW_REQUEST,
            Payload::new()
                .with("appointmentId", appointment.id)
                .with("providerId", appointment.provider_id),
        )
        .with_source_user(appointment.patient_id)
        .with_source_provider(appointment.provider_id);

        self.publisher.publish(&request).await;

        Ok(())
    }
}

/// `APPOINTMENT_CANCELED`: record who canceled and move the visit to the
/// matching terminal state.
pub struct AppointmentCanceledHandler {
    store: Arc<dyn AppointmentStore>,
}

impl AppointmentCanceledHandler {
    pub fn new(store: Arc<dyn AppointmentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for AppointmentCanceledHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let appointment_id = envelope
            .payload
            .get_i64("appointmentId")
            .map_err(payload_failure)?;
        let canceled_by = envelope
            .payload
            .get_str("canceledBy")
            .map_err(payload_failure)?;

        let transition = match canceled_by {
            "PATIENT" => AppointmentTransition::CancelByPatient,
            "PROVIDER" => AppointmentTransition::CancelByProvider,
            other => {
                return Err(HandlerError::Permanent(format!(
                    "unknown canceledBy value: {}",
                    other
                )))
            }
        };

        self.store
            .apply(appointment_id, transition, envelope.timestamp)
            .await
            .map_err(store_failure)?;

        tracing::info!(appointment_id, canceled_by = %canceled_by, "Appointment canceled");
        Ok(())
    }
}

/// `USER_DELETED`: a deleted patient account cannot attend anything, so every
/// upcoming visit is canceled on the provider's behalf.
pub struct UserDeletedHandler {
    store: Arc<dyn AppointmentStore>,
}

impl UserDeletedHandler {
    pub fn new(store: Arc<dyn AppointmentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for UserDeletedHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        // Producers set sourceUserId; older ones put userId in the payload.
        let user_id = match envelope.source_user_id {
            Some(id) => id,
            None => envelope.payload.get_i64("userId").map_err(payload_failure)?,
        };

        let canceled = self
            .store
            .cancel_upcoming_for_patient(user_id, envelope.timestamp)
            .await
            .map_err(store_failure)?;

        tracing::info!(
            user_id,
            canceled = canceled.len(),
            "Canceled upcoming appointments for deleted user"
        );
        Ok(())
    }
}
