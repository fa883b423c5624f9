//! Notification delivery state machine
//!
//! A delivery crosses two async boundaries: the outbound send (PENDING →
//! SENT/FAILED) and the provider's delivery webhook (SENT →
//! DELIVERED/BOUNCED). `retry_count` moves only on failure transitions, so a
//! deduplicated webhook redelivery cannot inflate it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::NotificationDelivery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
    Bounced,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::Sent => "SENT",
            DeliveryStatus::Delivered => "DELIVERED",
            DeliveryStatus::Failed => "FAILED",
            DeliveryStatus::Bounced => "BOUNCED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(DeliveryStatus::Pending),
            "SENT" => Some(DeliveryStatus::Sent),
            "DELIVERED" => Some(DeliveryStatus::Delivered),
            "FAILED" => Some(DeliveryStatus::Failed),
            "BOUNCED" => Some(DeliveryStatus::Bounced),
            _ => None,
        }
    }

    /// FAILED is terminal except for the retry sweep's `requeue`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered | DeliveryStatus::Failed | DeliveryStatus::Bounced
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal delivery transition: {attempted} not allowed from {from:?}")]
pub struct InvalidTransition {
    pub from: DeliveryStatus,
    pub attempted: &'static str,
}

impl NotificationDelivery {
    /// PENDING → SENT, recording the provider's message id
    pub fn mark_sent(
        &mut self,
        provider_message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if self.status != DeliveryStatus::Pending {
            return Err(InvalidTransition {
                from: self.status,
                attempted: "mark_sent",
            });
        }
        self.status = DeliveryStatus::Sent;
        self.provider_message_id = Some(provider_message_id.to_string());
        self.status_changed_at = now;
        Ok(())
    }

    /// PENDING → FAILED, counting the attempt
    pub fn mark_failed(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        if self.status != DeliveryStatus::Pending {
            return Err(InvalidTransition {
                from: self.status,
                attempted: "mark_failed",
            });
        }
        self.status = DeliveryStatus::Failed;
        self.retry_count += 1;
        self.status_changed_at = now;
        Ok(())
    }

    /// SENT → DELIVERED
    pub fn mark_delivered(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        if self.status != DeliveryStatus::Sent {
            return Err(InvalidTransition {
                from: self.status,
                attempted: "mark_delivered",
            });
        }
        self.status = DeliveryStatus::Delivered;
        self.status_changed_at = now;
        Ok(())
    }

    /// SENT → BOUNCED, counting the attempt
    pub fn mark_bounced(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        if self.status != DeliveryStatus::Sent {
            return Err(InvalidTransition {
                from: self.status,
                attempted: "mark_bounced",
            });
        }
        self.status = DeliveryStatus::Bounced;
        self.retry_count += 1;
        self.status_changed_at = now;
        Ok(())
    }

    /// FAILED → PENDING, legal only while attempts remain
    pub fn requeue(
        &mut self,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if self.status != DeliveryStatus::Failed || self.retry_count >= max_attempts {
            return Err(InvalidTransition {
                from: self.status,
                attempted: "requeue",
            });
        }
        self.status = DeliveryStatus::Pending;
        self.status_changed_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NotificationDelivery, NotificationKind};

    fn delivery_in(status: DeliveryStatus) -> NotificationDelivery {
        let mut d = NotificationDelivery::new(1, NotificationKind::Welcome, 10, Utc::now());
        d.status = status;
        d
    }

    #[test]
    fn test_send_and_deliver_flow() {
        let mut d = delivery_in(DeliveryStatus::Pending);
        let now = Utc::now();

        d.mark_sent("msg-1", now).unwrap();
        assert_eq!(d.provider_message_id.as_deref(), Some("msg-1"));

        d.mark_delivered(now).unwrap();
        assert_eq!(d.status, DeliveryStatus::Delivered);
        assert_eq!(d.retry_count, 0);
    }

    #[test]
    fn test_failure_counts_attempt_and_requeue_resets() {
        let mut d = delivery_in(DeliveryStatus::Pending);
        let now = Utc::now();

        d.mark_failed(now).unwrap();
        assert_eq!(d.retry_count, 1);

        d.requeue(3, now).unwrap();
        assert_eq!(d.status, DeliveryStatus::Pending);
        assert_eq!(d.retry_count, 1, "requeue keeps the attempt count");
    }

    #[test]
    fn test_requeue_refused_at_attempt_ceiling() {
        let mut d = delivery_in(DeliveryStatus::Failed);
        d.retry_count = 3;

        assert!(d.requeue(3, Utc::now()).is_err());
        assert_eq!(d.status, DeliveryStatus::Failed);
    }

    #[test]
    fn test_bounce_counts_attempt() {
        let mut d = delivery_in(DeliveryStatus::Sent);

        d.mark_bounced(Utc::now()).unwrap();
        assert_eq!(d.status, DeliveryStatus::Bounced);
        assert_eq!(d.retry_count, 1);
    }

    #[test]
    fn test_webhook_transitions_require_sent() {
        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::Delivered,
            DeliveryStatus::Failed,
            DeliveryStatus::Bounced,
        ] {
            let mut d = delivery_in(status);
            assert!(d.mark_delivered(Utc::now()).is_err());
            assert!(d.mark_bounced(Utc::now()).is_err());
            assert_eq!(d.status, status);
        }
    }

    #[test]
    fn test_delivered_is_stable() {
        let mut d = delivery_in(DeliveryStatus::Delivered);
        assert!(d.mark_sent("msg-2", Utc::now()).is_err());
        assert!(d.mark_failed(Utc::now()).is_err());
        assert!(d.requeue(5, Utc::now()).is_err());
    }
}
