//! Subscription domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lifecycle::SubscriptionStatus;

/// A provider's plan subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: i64,
    pub provider_id: i64,
    /// Plan tier; lower ids are cheaper tiers
    pub plan_id: i64,
    pub status: SubscriptionStatus,
    /// Billing provider's subscription reference; set once checkout completes
    pub external_ref: Option<String>,
    /// Visits consumed against the current billing period
    pub appointments_used: i64,
    pub status_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// New subscription shell, born INCOMPLETE
    pub fn new(id: i64, provider_id: i64, plan_id: i64) -> Self {
        let now = Utc::now();
        Self {
            id,
            provider_id,
            plan_id,
            status: SubscriptionStatus::Incomplete,
            external_ref: None,
            appointments_used: 0,
            status_changed_at: now,
            created_at: now,
        }
    }

    pub fn with_external_ref(mut self, external_ref: &str) -> Self {
        self.external_ref = Some(external_ref.to_string());
        self
    }
}
