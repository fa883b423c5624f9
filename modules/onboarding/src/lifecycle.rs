//! Onboarding step state machine
//!
//! Each checklist step moves through review independently. The blocking and
//! finished predicates are pure functions of the current state and are never
//! stored, so they cannot drift from the status column.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    InProgress,
    UnderReview,
    ActionRequired,
    Completed,
    Rejected,
    NotRequired,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::InProgress => "IN_PROGRESS",
            StepStatus::UnderReview => "UNDER_REVIEW",
            StepStatus::ActionRequired => "ACTION_REQUIRED",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Rejected => "REJECTED",
            StepStatus::NotRequired => "NOT_REQUIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(StepStatus::Pending),
            "IN_PROGRESS" => Some(StepStatus::InProgress),
            "UNDER_REVIEW" => Some(StepStatus::UnderReview),
            "ACTION_REQUIRED" => Some(StepStatus::ActionRequired),
            "COMPLETED" => Some(StepStatus::Completed),
            "REJECTED" => Some(StepStatus::Rejected),
            "NOT_REQUIRED" => Some(StepStatus::NotRequired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Rejected | StepStatus::NotRequired
        )
    }

    /// The step is holding the provider back from going live
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            StepStatus::Pending | StepStatus::ActionRequired | StepStatus::Rejected
        )
    }

    /// The step needs no further provider input
    pub fn is_finished(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::NotRequired)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal onboarding step transition: {attempted} not allowed from {from:?}")]
pub struct InvalidTransition {
    pub from: StepStatus,
    pub attempted: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepTransition {
    Start,
    SubmitForReview,
    RequestAction,
    Approve,
    Reject,
    Waive,
}

impl StepTransition {
    pub fn name(&self) -> &'static str {
        match self {
            StepTransition::Start => "start",
            StepTransition::SubmitForReview => "submit_for_review",
            StepTransition::RequestAction => "request_action",
            StepTransition::Approve => "approve",
            StepTransition::Reject => "reject",
            StepTransition::Waive => "waive",
        }
    }
}

/// Compute the next status for a transition, or reject it.
pub fn apply_transition(
    from: StepStatus,
    transition: StepTransition,
) -> Result<StepStatus, InvalidTransition> {
    use StepStatus::*;
    use StepTransition::*;

    let next = match (from, transition) {
        (Pending | ActionRequired, Start) => InProgress,
        (InProgress, SubmitForReview) => UnderReview,
        (UnderReview, RequestAction) => ActionRequired,
        (InProgress | UnderReview, Approve) => Completed,
        (UnderReview, Reject) => Rejected,
        (Pending, Waive) => NotRequired,
        _ => {
            return Err(InvalidTransition {
                from,
                attempted: transition.name(),
            })
        }
    };
    Ok(next)
}

/// One step within a provider's checklist
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingStep {
    pub status: StepStatus,
    pub status_changed_at: DateTime<Utc>,
}

impl OnboardingStep {
    pub fn pending(now: DateTime<Utc>) -> Self {
        Self {
            status: StepStatus::Pending,
            status_changed_at: now,
        }
    }

    pub fn apply(
        &mut self,
        transition: StepTransition,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        self.status = apply_transition(self.status, transition)?;
        self.status_changed_at = now;
        Ok(())
    }
}
