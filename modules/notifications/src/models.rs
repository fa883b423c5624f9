//! Notification delivery model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lifecycle::DeliveryStatus;

/// What the notification is about; each kind maps to one template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Welcome,
    AppointmentConfirmation,
    ReviewRequest,
    ReviewAlert,
    ProviderReplyAlert,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Welcome => "WELCOME",
            NotificationKind::AppointmentConfirmation => "APPOINTMENT_CONFIRMATION",
            NotificationKind::ReviewRequest => "REVIEW_REQUEST",
            NotificationKind::ReviewAlert => "REVIEW_ALERT",
            NotificationKind::ProviderReplyAlert => "PROVIDER_REPLY_ALERT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WELCOME" => Some(NotificationKind::Welcome),
            "APPOINTMENT_CONFIRMATION" => Some(NotificationKind::AppointmentConfirmation),
            "REVIEW_REQUEST" => Some(NotificationKind::ReviewRequest),
            "REVIEW_ALERT" => Some(NotificationKind::ReviewAlert),
            "PROVIDER_REPLY_ALERT" => Some(NotificationKind::ProviderReplyAlert),
            _ => None,
        }
    }
}

/// One outbound notification and its delivery state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDelivery {
    pub id: i64,
    pub kind: NotificationKind,
    pub recipient_user_id: i64,
    pub status: DeliveryStatus,
    /// Assigned by the delivery provider on successful send; the webhook
    /// correlates on this
    pub provider_message_id: Option<String>,
    pub retry_count: i32,
    pub status_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl NotificationDelivery {
    /// New delivery, born PENDING
    pub fn new(
        id: i64,
        kind: NotificationKind,
        recipient_user_id: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            recipient_user_id,
            status: DeliveryStatus::Pending,
            provider_message_id: None,
            retry_count: 0,
            status_changed_at: now,
            created_at: now,
        }
    }
}
