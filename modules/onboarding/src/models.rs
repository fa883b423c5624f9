//! Onboarding checklist model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::lifecycle::{OnboardingStep, StepStatus};

/// The steps every provider walks through before going live
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    ProfileDetails,
    IdentityDocuments,
    PlanSelection,
    ServiceCatalog,
}

impl StepKind {
    pub const ALL: [StepKind; 4] = [
        StepKind::ProfileDetails,
        StepKind::IdentityDocuments,
        StepKind::PlanSelection,
        StepKind::ServiceCatalog,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::ProfileDetails => "PROFILE_DETAILS",
            StepKind::IdentityDocuments => "IDENTITY_DOCUMENTS",
            StepKind::PlanSelection => "PLAN_SELECTION",
            StepKind::ServiceCatalog => "SERVICE_CATALOG",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PROFILE_DETAILS" => Some(StepKind::ProfileDetails),
            "IDENTITY_DOCUMENTS" => Some(StepKind::IdentityDocuments),
            "PLAN_SELECTION" => Some(StepKind::PlanSelection),
            "SERVICE_CATALOG" => Some(StepKind::ServiceCatalog),
            _ => None,
        }
    }
}

/// One provider's onboarding checklist, keyed by provider id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checklist {
    pub provider_id: i64,
    pub steps: BTreeMap<StepKind, OnboardingStep>,
    pub selected_plan_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Checklist {
    /// Fresh checklist with every step PENDING
    pub fn new(provider_id: i64, selected_plan_id: Option<i64>, now: DateTime<Utc>) -> Self {
        let steps = StepKind::ALL
            .into_iter()
            .map(|kind| (kind, OnboardingStep::pending(now)))
            .collect();

        Self {
            provider_id,
            steps,
            selected_plan_id,
            created_at: now,
        }
    }

    pub fn step_status(&self, kind: StepKind) -> Option<StepStatus> {
        self.steps.get(&kind).map(|s| s.status)
    }

    /// Any step still holding the provider back
    pub fn has_blocking_steps(&self) -> bool {
        self.steps.values().any(|s| s.status.is_blocking())
    }

    /// Every step finished: the provider can go live
    pub fn is_complete(&self) -> bool {
        self.steps.values().all(|s| s.status.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::StepTransition;

    #[test]
    fn test_new_checklist_is_all_pending_and_blocking() {
        let checklist = Checklist::new(500, Some(3), Utc::now());

        assert_eq!(checklist.steps.len(), 4);
        for kind in StepKind::ALL {
            assert_eq!(checklist.step_status(kind), Some(StepStatus::Pending));
        }
        assert!(checklist.has_blocking_steps());
        assert!(!checklist.is_complete());
    }

    #[test]
    fn test_checklist_completes_when_every_step_finishes() {
        let now = Utc::now();
        let mut checklist = Checklist::new(500, None, now);

        for kind in [
            StepKind::ProfileDetails,
            StepKind::IdentityDocuments,
            StepKind::ServiceCatalog,
        ] {
            let step = checklist.steps.get_mut(&kind).unwrap();
            step.apply(StepTransition::Start, now).unwrap();
            step.apply(StepTransition::Approve, now).unwrap();
        }
        // Plan selection waived (e.g. invited provider on a comped plan).
        checklist
            .steps
            .get_mut(&StepKind::PlanSelection)
            .unwrap()
            .apply(StepTransition::Waive, now)
            .unwrap();

        assert!(!checklist.has_blocking_steps());
        assert!(checklist.is_complete());
    }

    #[test]
    fn test_in_progress_neither_blocks_nor_finishes() {
        let now = Utc::now();
        let mut checklist = Checklist::new(500, None, now);
        checklist
            .steps
            .get_mut(&StepKind::ProfileDetails)
            .unwrap()
            .apply(StepTransition::Start, now)
            .unwrap();

        let status = checklist.step_status(StepKind::ProfileDetails).unwrap();
        assert!(!status.is_blocking());
        assert!(!status.is_finished());
        // Other steps are still PENDING, so the checklist still blocks.
        assert!(checklist.has_blocking_steps());
    }
}
