//! Delivery provider webhook
//!
//! `POST /api/webhooks/delivery` reports the fate of a sent message. The
//! provider redelivers until it sees a 2xx, so the webhook id goes through the
//! idempotency guard first: a redelivered bounce increments `retry_count` at
//! most once. Deliveries are correlated strictly by `providerMessageId`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use event_consumer::IdempotencyGuard;
use serde::Deserialize;
use std::sync::Arc;

use crate::store::{DeliveryOutcome, DeliveryStore, StoreError};

#[derive(Clone)]
pub struct WebhookState {
    pub store: Arc<dyn DeliveryStore>,
    pub guard: Arc<dyn IdempotencyGuard>,
}

/// Delivery report as posted by the provider
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    /// Provider-assigned webhook event id (idempotency key)
    pub id: String,
    pub provider_message_id: String,
    /// `delivered` or `bounced`
    pub status: String,
}

pub fn delivery_webhook_router(state: WebhookState) -> Router {
    Router::new()
        .route("/api/webhooks/delivery", post(handle_delivery_report))
        .with_state(state)
}

async fn handle_delivery_report(
    State(state): State<WebhookState>,
    Json(report): Json<DeliveryReport>,
) -> (StatusCode, Json<serde_json::Value>) {
    let outcome = match report.status.as_str() {
        "delivered" => DeliveryOutcome::Delivered,
        "bounced" => DeliveryOutcome::Bounced,
        other => {
            tracing::warn!(webhook_id = %report.id, status = %other, "Unknown delivery status");
            return (
                StatusCode::OK,
                Json(serde_json::json!({"status": "ignored", "reason": "unknown status"})),
            );
        }
    };

    let guard_key = format!("delivery:{}", report.id);

    match state.guard.check_and_record(&guard_key, &report.status).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!(webhook_id = %report.id, "Duplicate delivery report acknowledged");
            return (
                StatusCode::OK,
                Json(serde_json::json!({"status": "duplicate"})),
            );
        }
        Err(e) => {
            tracing::warn!(error = %e, "Idempotency guard unavailable, asking provider to retry");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"status": "retry"})),
            );
        }
    }

    match state
        .store
        .apply_outcome(&report.provider_message_id, outcome, chrono::Utc::now())
        .await
    {
        Ok(delivery) => {
            tracing::info!(
                delivery_id = delivery.id,
                status = delivery.status.as_str(),
                "Delivery report applied"
            );
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "status": "applied",
                    "deliveryStatus": delivery.status.as_str()
                })),
            )
        }
        Err(StoreError::Unavailable(reason)) => {
            tracing::warn!(webhook_id = %report.id, reason = %reason, "Store unavailable");
            if let Err(e) = state.guard.forget(&guard_key).await {
                tracing::error!(error = %e, "Failed to release guard entry");
            }
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"status": "retry"})),
            )
        }
        Err(e) => {
            // Unknown message ids and illegal transitions cannot be fixed by
            // provider retries.
            tracing::warn!(webhook_id = %report.id, error = %e, "Delivery report ignored");
            (
                StatusCode::OK,
                Json(serde_json::json!({"status": "ignored", "reason": e.to_string()})),
            )
        }
    }
}
