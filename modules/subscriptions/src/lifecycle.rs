//! Subscription lifecycle state machine
//!
//! Billing webhooks and bus events arrive in any order; legality checks here
//! keep a late `invoice.paid` from reviving a canceled subscription.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Subscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Incomplete,
    Trialing,
    Active,
    PastDue,
    Pending,
    Unpaid,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Incomplete => "INCOMPLETE",
            SubscriptionStatus::Trialing => "TRIALING",
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::PastDue => "PAST_DUE",
            SubscriptionStatus::Pending => "PENDING",
            SubscriptionStatus::Unpaid => "UNPAID",
            SubscriptionStatus::Canceled => "CANCELED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INCOMPLETE" => Some(SubscriptionStatus::Incomplete),
            "TRIALING" => Some(SubscriptionStatus::Trialing),
            "ACTIVE" => Some(SubscriptionStatus::Active),
            "PAST_DUE" => Some(SubscriptionStatus::PastDue),
            "PENDING" => Some(SubscriptionStatus::Pending),
            "UNPAID" => Some(SubscriptionStatus::Unpaid),
            "CANCELED" => Some(SubscriptionStatus::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Canceled | SubscriptionStatus::Unpaid
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal subscription transition: {attempted} not allowed from {from:?}")]
pub struct InvalidTransition {
    pub from: SubscriptionStatus,
    pub attempted: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionTransition {
    StartTrial,
    Activate,
    MarkPastDue,
    MarkPending,
    MarkUnpaid,
    Cancel,
}

impl SubscriptionTransition {
    pub fn name(&self) -> &'static str {
        match self {
            SubscriptionTransition::StartTrial => "start_trial",
            SubscriptionTransition::Activate => "activate",
            SubscriptionTransition::MarkPastDue => "mark_past_due",
            SubscriptionTransition::MarkPending => "mark_pending",
            SubscriptionTransition::MarkUnpaid => "mark_unpaid",
            SubscriptionTransition::Cancel => "cancel",
        }
    }
}

impl Subscription {
    fn transition_to(
        &mut self,
        legal_from: &[SubscriptionStatus],
        next: SubscriptionStatus,
        attempted: &'static str,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if !legal_from.contains(&self.status) {
            return Err(InvalidTransition {
                from: self.status,
                attempted,
            });
        }
        self.status = next;
        self.status_changed_at = now;
        Ok(())
    }

    /// INCOMPLETE → TRIALING
    pub fn start_trial(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition_to(
            &[SubscriptionStatus::Incomplete],
            SubscriptionStatus::Trialing,
            "start_trial",
            now,
        )
    }

    /// INCOMPLETE | TRIALING | PAST_DUE | PENDING → ACTIVE
    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition_to(
            &[
                SubscriptionStatus::Incomplete,
                SubscriptionStatus::Trialing,
                SubscriptionStatus::PastDue,
                SubscriptionStatus::Pending,
            ],
            SubscriptionStatus::Active,
            "activate",
            now,
        )
    }

    /// TRIALING | ACTIVE → PAST_DUE
    pub fn mark_past_due(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition_to(
            &[SubscriptionStatus::Trialing, SubscriptionStatus::Active],
            SubscriptionStatus::PastDue,
            "mark_past_due",
            now,
        )
    }

    /// INCOMPLETE | ACTIVE → PENDING
    pub fn mark_pending(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition_to(
            &[SubscriptionStatus::Incomplete, SubscriptionStatus::Active],
            SubscriptionStatus::Pending,
            "mark_pending",
            now,
        )
    }

    /// PAST_DUE | PENDING → UNPAID
    pub fn mark_unpaid(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition_to(
            &[SubscriptionStatus::PastDue, SubscriptionStatus::Pending],
            SubscriptionStatus::Unpaid,
            "mark_unpaid",
            now,
        )
    }

    /// Any non-terminal state → CANCELED
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        if self.status.is_terminal() {
            return Err(InvalidTransition {
                from: self.status,
                attempted: "cancel",
            });
        }
        self.status = SubscriptionStatus::Canceled;
        self.status_changed_at = now;
        Ok(())
    }

    pub fn apply(
        &mut self,
        transition: SubscriptionTransition,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        match transition {
            SubscriptionTransition::StartTrial => self.start_trial(now),
            SubscriptionTransition::Activate => self.activate(now),
            SubscriptionTransition::MarkPastDue => self.mark_past_due(now),
            SubscriptionTransition::MarkPending => self.mark_pending(now),
            SubscriptionTransition::MarkUnpaid => self.mark_unpaid(now),
            SubscriptionTransition::Cancel => self.cancel(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription_in(status: SubscriptionStatus) -> Subscription {
        let mut sub = Subscription::new(1, 500, 3);
        sub.status = status;
        sub
    }

    const ALL_STATUSES: [SubscriptionStatus; 7] = [
        SubscriptionStatus::Incomplete,
        SubscriptionStatus::Trialing,
        SubscriptionStatus::Active,
        SubscriptionStatus::PastDue,
        SubscriptionStatus::Pending,
        SubscriptionStatus::Unpaid,
        SubscriptionStatus::Canceled,
    ];

    const ALL_TRANSITIONS: [SubscriptionTransition; 6] = [
        SubscriptionTransition::StartTrial,
        SubscriptionTransition::Activate,
        SubscriptionTransition::MarkPastDue,
        SubscriptionTransition::MarkPending,
        SubscriptionTransition::MarkUnpaid,
        SubscriptionTransition::Cancel,
    ];

    fn is_legal(from: SubscriptionStatus, transition: SubscriptionTransition) -> bool {
        use SubscriptionStatus::*;
        use SubscriptionTransition::*;
        matches!(
            (from, transition),
            (Incomplete, StartTrial)
                | (Incomplete | Trialing | PastDue | Pending, Activate)
                | (Trialing | Active, MarkPastDue)
                | (Incomplete | Active, MarkPending)
                | (PastDue | Pending, MarkUnpaid)
                | (Incomplete | Trialing | Active | PastDue | Pending, Cancel)
        )
    }

    #[test]
    fn test_full_legality_matrix() {
        for from in ALL_STATUSES {
            for transition in ALL_TRANSITIONS {
                let mut sub = subscription_in(from);
                let result = sub.apply(transition, Utc::now());

                if is_legal(from, transition) {
                    assert!(result.is_ok(), "{:?} should allow {}", from, transition.name());
                } else {
                    assert!(result.is_err(), "{:?} should reject {}", from, transition.name());
                    assert_eq!(sub.status, from);
                }
            }
        }
    }

    #[test]
    fn test_trial_to_paid_flow() {
        let mut sub = subscription_in(SubscriptionStatus::Incomplete);
        let now = Utc::now();

        sub.start_trial(now).unwrap();
        sub.activate(now).unwrap();
        sub.mark_past_due(now).unwrap();
        sub.activate(now).unwrap();

        assert_eq!(sub.status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_dunning_exhaustion_is_terminal() {
        let mut sub = subscription_in(SubscriptionStatus::PastDue);
        let now = Utc::now();

        sub.mark_unpaid(now).unwrap();
        assert!(sub.status.is_terminal());
        assert!(sub.activate(now).is_err());
        assert!(sub.cancel(now).is_err());
    }

    #[test]
    fn test_late_payment_cannot_revive_canceled_subscription() {
        let mut sub = subscription_in(SubscriptionStatus::Canceled);

        assert!(sub.activate(Utc::now()).is_err());
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
    }
}
