//! Billing provider webhook
//!
//! `POST /api/webhooks/billing` receives billing lifecycle events. The
//! provider retries until it sees a 2xx, so the endpoint is idempotent: the
//! provider's own event id goes through the same guard as bus event ids, and a
//! redelivered webhook is acknowledged without reapplying. Rows are looked up
//! strictly by the provider-assigned `external_ref` — never guessed.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use event_bus::{event_types, EventEnvelope, EventPublisher, Payload};
use event_consumer::IdempotencyGuard;
use serde::Deserialize;
use std::sync::Arc;

use crate::lifecycle::SubscriptionTransition;
use crate::store::{StoreError, SubscriptionStore};

#[derive(Clone)]
pub struct WebhookState {
    pub store: Arc<dyn SubscriptionStore>,
    pub guard: Arc<dyn IdempotencyGuard>,
    pub publisher: Arc<dyn EventPublisher>,
}

/// Billing event as delivered by the provider
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingEvent {
    /// Provider-assigned event id (idempotency key)
    pub id: String,
    /// Provider event type, e.g. `invoice.paid`
    #[serde(rename = "type")]
    pub kind: String,
    /// Provider-assigned subscription reference
    pub external_ref: String,
    /// New plan tier, present on `plan.changed`
    #[serde(default)]
    pub plan_id: Option<i64>,
}

pub fn billing_webhook_router(state: WebhookState) -> Router {
    Router::new()
        .route("/api/webhooks/billing", post(handle_billing_event))
        .with_state(state)
}

fn transition_for(kind: &str) -> Option<SubscriptionTransition> {
    match kind {
        "subscription.trial_started" => Some(SubscriptionTransition::StartTrial),
        "invoice.paid" => Some(SubscriptionTransition::Activate),
        "invoice.payment_failed" => Some(SubscriptionTransition::MarkPastDue),
        "payment.action_required" => Some(SubscriptionTransition::MarkPending),
        "subscription.unpaid" => Some(SubscriptionTransition::MarkUnpaid),
        "subscription.canceled" => Some(SubscriptionTransition::Cancel),
        _ => None,
    }
}

async fn handle_billing_event(
    State(state): State<WebhookState>,
    Json(event): Json<BillingEvent>,
) -> (StatusCode, Json<serde_json::Value>) {
    let guard_key = format!("billing:{}", event.id);

    match state.guard.check_and_record(&guard_key, &event.kind).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!(webhook_id = %event.id, "Duplicate billing webhook acknowledged");
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

    match apply_billing_event(&state, &event).await {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(StoreError::Unavailable(reason)) => {
            tracing::warn!(webhook_id = %event.id, reason = %reason, "Store unavailable");
            // Release the guard so the provider's retry gets applied.
            if let Err(e) = state.guard.forget(&guard_key).await {
                tracing::error!(error = %e, "Failed to release guard entry");
            }
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"status": "retry"})),
            )
        }
        Err(e) => {
            // Unknown refs and illegal transitions are acknowledged: retrying
            // them can never succeed.
            tracing::warn!(webhook_id = %event.id, error = %e, "Billing webhook ignored");
            (
                StatusCode::OK,
                Json(serde_json::json!({"status": "ignored", "reason": e.to_string()})),
            )
        }
    }
}

async fn apply_billing_event(
    state: &WebhookState,
    event: &BillingEvent,
) -> Result<serde_json::Value, StoreError> {
    let subscription = state.store.get_by_external_ref(&event.external_ref).await?;
    let now = chrono::Utc::now();

    if event.kind == "plan.changed" {
        let Some(plan_id) = event.plan_id else {
            return Ok(serde_json::json!({"status": "ignored", "reason": "planId missing"}));
        };

        let previous = state.store.set_plan(subscription.id, plan_id).await?;

        // Lower tier ids are cheaper: moving down publishes the downgrade
        // fact other modules react to.
        if plan_id < previous {
            let envelope = EventEnvelope::new(
                event_types::PLAN_DOWNGRADED,
                Payload::new()
                    .with("providerId", subscription.provider_id)
                    .with("planId", plan_id),
            )
            .with_source_provider(subscription.provider_id);
            state.publisher.publish(&envelope).await;
        }

        tracing::info!(
            subscription_id = subscription.id,
            previous_plan = previous,
            plan_id,
            "Plan changed"
        );
        return Ok(serde_json::json!({"status": "applied"}));
    }

    let Some(transition) = transition_for(&event.kind) else {
        tracing::debug!(kind = %event.kind, "Unrecognized billing event type ignored");
        return Ok(serde_json::json!({"status": "ignored", "reason": "unknown event type"}));
    };

    let updated = state.store.apply(subscription.id, transition, now).await?;

    tracing::info!(
        subscription_id = updated.id,
        status = updated.status.as_str(),
        kind = %event.kind,
        "Billing webhook applied"
    );

    Ok(serde_json::json!({"status": "applied", "subscriptionStatus": updated.status.as_str()}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::SubscriptionStatus;
    use crate::models::Subscription;
    use crate::store::InMemorySubscriptionStore;
    use event_bus::{BusPublisher, EventBus, InMemoryBus};
    use event_consumer::InMemoryGuard;
    use futures::StreamExt;
    use std::time::Duration;

    fn billing(id: &str, kind: &str, external_ref: &str) -> BillingEvent {
        BillingEvent {
            id: id.to_string(),
            kind: kind.to_string(),
            external_ref: external_ref.to_string(),
            plan_id: None,
        }
    }

    async fn state_with_subscription(status: SubscriptionStatus) -> (WebhookState, Arc<InMemoryBus>) {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let mut sub = Subscription::new(1, 500, 3).with_external_ref("sub_abc");
        sub.status = status;
        store.insert(&sub).await.unwrap();

        let bus = Arc::new(InMemoryBus::new());
        let state = WebhookState {
            store,
            guard: Arc::new(InMemoryGuard::new()),
            publisher: Arc::new(BusPublisher::new(bus.clone())),
        };
        (state, bus)
    }

    #[tokio::test]
    async fn test_invoice_paid_activates() {
        let (state, _bus) = state_with_subscription(SubscriptionStatus::Trialing).await;

        let (status, _) = handle_billing_event(
            State(state.clone()),
            Json(billing("evt_1", "invoice.paid", "sub_abc")),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            state.store.get(1).await.unwrap().status,
            SubscriptionStatus::Active
        );
    }

    #[tokio::test]
    async fn test_redelivered_webhook_applies_once() {
        let (state, _bus) = state_with_subscription(SubscriptionStatus::Active).await;

        for _ in 0..3 {
            let (status, _) = handle_billing_event(
                State(state.clone()),
                Json(billing("evt_2", "invoice.payment_failed", "sub_abc")),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        // Applied exactly once: PAST_DUE, and the duplicate did not then try
        // the (illegal) PAST_DUE -> PAST_DUE transition.
        assert_eq!(
            state.store.get(1).await.unwrap().status,
            SubscriptionStatus::PastDue
        );
    }

    #[tokio::test]
    async fn test_unknown_external_ref_is_acknowledged_not_applied() {
        let (state, _bus) = state_with_subscription(SubscriptionStatus::Active).await;

        let (status, Json(body)) = handle_billing_event(
            State(state.clone()),
            Json(billing("evt_3", "invoice.paid", "sub_zzz")),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ignored");
    }

    #[tokio::test]
    async fn test_illegal_transition_is_acknowledged_without_mutation() {
        let (state, _bus) = state_with_subscription(SubscriptionStatus::Canceled).await;

        let (status, Json(body)) = handle_billing_event(
            State(state.clone()),
            Json(billing("evt_4", "invoice.paid", "sub_abc")),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ignored");
        assert_eq!(
            state.store.get(1).await.unwrap().status,
            SubscriptionStatus::Canceled
        );
    }

    #[tokio::test]
    async fn test_plan_downgrade_publishes_event() {
        let (state, bus) = state_with_subscription(SubscriptionStatus::Active).await;
        let mut stream = bus.subscribe("marketplace.events.PLAN_DOWNGRADED").await.unwrap();

        let event = BillingEvent {
            id: "evt_5".to_string(),
            kind: "plan.changed".to_string(),
            external_ref: "sub_abc".to_string(),
            plan_id: Some(1),
        };
        let (status, _) = handle_billing_event(State(state.clone()), Json(event)).await;
        assert_eq!(status, StatusCode::OK);

        let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");
        let envelope: EventEnvelope = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(envelope.payload.get_i64("providerId").unwrap(), 500);
        assert_eq!(envelope.payload.get_i64("planId").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_plan_upgrade_publishes_nothing() {
        let (state, bus) = state_with_subscription(SubscriptionStatus::Active).await;
        let mut stream = bus.subscribe("marketplace.events.>").await.unwrap();

        let event = BillingEvent {
            id: "evt_6".to_string(),
            kind: "plan.changed".to_string(),
            external_ref: "sub_abc".to_string(),
            plan_id: Some(9),
        };
        handle_billing_event(State(state.clone()), Json(event)).await;

        assert_eq!(state.store.get(1).await.unwrap().plan_id, 9);
        assert!(
            tokio::time::timeout(Duration::from_millis(100), stream.next())
                .await
                .is_err()
        );
    }
}
