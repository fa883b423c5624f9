//! Appointment lifecycle state machine
//!
//! Every status change goes through a legal-transition check; an illegal
//! attempt fails with [`InvalidTransition`] and leaves state untouched. This
//! is the second half of the out-of-order defense: events may arrive in any
//! interleaving, so a late `complete` on a canceled appointment must be a
//! rejected no-op, not silent corruption.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Appointment;

/// Appointment status, serialized as UPPER_SNAKE strings on the wire and in
/// storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Scheduled,
    WaitingRoom,
    InProgress,
    Completed,
    CanceledByPatient,
    CanceledByProvider,
    NoShow,
    Rescheduled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "SCHEDULED",
            AppointmentStatus::WaitingRoom => "WAITING_ROOM",
            AppointmentStatus::InProgress => "IN_PROGRESS",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::CanceledByPatient => "CANCELED_BY_PATIENT",
            AppointmentStatus::CanceledByProvider => "CANCELED_BY_PROVIDER",
            AppointmentStatus::NoShow => "NO_SHOW",
            AppointmentStatus::Rescheduled => "RESCHEDULED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SCHEDULED" => Some(AppointmentStatus::Scheduled),
            "WAITING_ROOM" => Some(AppointmentStatus::WaitingRoom),
            "IN_PROGRESS" => Some(AppointmentStatus::InProgress),
            "COMPLETED" => Some(AppointmentStatus::Completed),
            "CANCELED_BY_PATIENT" => Some(AppointmentStatus::CanceledByPatient),
            "CANCELED_BY_PROVIDER" => Some(AppointmentStatus::CanceledByProvider),
            "NO_SHOW" => Some(AppointmentStatus::NoShow),
            "RESCHEDULED" => Some(AppointmentStatus::Rescheduled),
            _ => None,
        }
    }

    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed
                | AppointmentStatus::CanceledByPatient
                | AppointmentStatus::CanceledByProvider
                | AppointmentStatus::NoShow
        )
    }
}

/// Attempted transition rejected by the legal-transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal appointment transition: {attempted} not allowed from {from:?}")]
pub struct InvalidTransition {
    pub from: AppointmentStatus,
    pub attempted: &'static str,
}

/// Externally-triggered transitions, used by handlers and the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentTransition {
    CheckIn,
    Begin,
    Complete,
    CancelByPatient,
    CancelByProvider,
    MarkNoShow,
    Reschedule,
    Rebook,
}

impl AppointmentTransition {
    pub fn name(&self) -> &'static str {
        match self {
            AppointmentTransition::CheckIn => "check_in",
            AppointmentTransition::Begin => "begin",
            AppointmentTransition::Complete => "complete",
            AppointmentTransition::CancelByPatient => "cancel_by_patient",
            AppointmentTransition::CancelByProvider => "cancel_by_provider",
            AppointmentTransition::MarkNoShow => "mark_no_show",
            AppointmentTransition::Reschedule => "reschedule",
            AppointmentTransition::Rebook => "rebook",
        }
    }
}

impl Appointment {
    fn transition_to(
        &mut self,
        legal_from: &[AppointmentStatus],
        next: AppointmentStatus,
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

    /// SCHEDULED → WAITING_ROOM
    pub fn check_in(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition_to(
            &[AppointmentStatus::Scheduled],
            AppointmentStatus::WaitingRoom,
            "check_in",
            now,
        )
    }

    /// WAITING_ROOM → IN_PROGRESS
    pub fn begin(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition_to(
            &[AppointmentStatus::WaitingRoom],
            AppointmentStatus::InProgress,
            "begin",
            now,
        )
    }

    /// IN_PROGRESS → COMPLETED
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition_to(
            &[AppointmentStatus::InProgress],
            AppointmentStatus::Completed,
            "complete",
            now,
        )
    }

    /// SCHEDULED | WAITING_ROOM | RESCHEDULED → CANCELED_BY_PATIENT
    pub fn cancel_by_patient(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition_to(
            &[
                AppointmentStatus::Scheduled,
                AppointmentStatus::WaitingRoom,
                AppointmentStatus::Rescheduled,
            ],
            AppointmentStatus::CanceledByPatient,
            "cancel_by_patient",
            now,
        )
    }

    /// SCHEDULED | WAITING_ROOM | RESCHEDULED → CANCELED_BY_PROVIDER
    pub fn cancel_by_provider(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition_to(
            &[
                AppointmentStatus::Scheduled,
                AppointmentStatus::WaitingRoom,
                AppointmentStatus::Rescheduled,
            ],
            AppointmentStatus::CanceledByProvider,
            "cancel_by_provider",
            now,
        )
    }

    /// SCHEDULED | WAITING_ROOM → NO_SHOW
    pub fn mark_no_show(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition_to(
            &[AppointmentStatus::Scheduled, AppointmentStatus::WaitingRoom],
            AppointmentStatus::NoShow,
            "mark_no_show",
            now,
        )
    }

    /// SCHEDULED | WAITING_ROOM → RESCHEDULED
    pub fn reschedule(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition_to(
            &[AppointmentStatus::Scheduled, AppointmentStatus::WaitingRoom],
            AppointmentStatus::Rescheduled,
            "reschedule",
            now,
        )
    }

    /// RESCHEDULED → SCHEDULED (re-enters the normal flow at the new slot)
    pub fn rebook(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition_to(
            &[AppointmentStatus::Rescheduled],
            AppointmentStatus::Scheduled,
            "rebook",
            now,
        )
    }

    /// Apply a named transition
    pub fn apply(
        &mut self,
        transition: AppointmentTransition,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        match transition {
            AppointmentTransition::CheckIn => self.check_in(now),
            AppointmentTransition::Begin => self.begin(now),
            AppointmentTransition::Complete => self.complete(now),
            AppointmentTransition::CancelByPatient => self.cancel_by_patient(now),
            AppointmentTransition::CancelByProvider => self.cancel_by_provider(now),
            AppointmentTransition::MarkNoShow => self.mark_no_show(now),
            AppointmentTransition::Reschedule => self.reschedule(now),
            AppointmentTransition::Rebook => self.rebook(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Appointment;

    fn appointment_in(status: AppointmentStatus) -> Appointment {
        let mut appt = Appointment::new(42, 7, 99, Utc::now());
        appt.status = status;
        appt
    }

    const ALL_STATUSES: [AppointmentStatus; 8] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::WaitingRoom,
        AppointmentStatus::InProgress,
        AppointmentStatus::Completed,
        AppointmentStatus::CanceledByPatient,
        AppointmentStatus::CanceledByProvider,
        AppointmentStatus::NoShow,
        AppointmentStatus::Rescheduled,
    ];

    const ALL_TRANSITIONS: [AppointmentTransition; 8] = [
        AppointmentTransition::CheckIn,
        AppointmentTransition::Begin,
        AppointmentTransition::Complete,
        AppointmentTransition::CancelByPatient,
        AppointmentTransition::CancelByProvider,
        AppointmentTransition::MarkNoShow,
        AppointmentTransition::Reschedule,
        AppointmentTransition::Rebook,
    ];

    fn is_legal(from: AppointmentStatus, transition: AppointmentTransition) -> bool {
        use AppointmentStatus::*;
        use AppointmentTransition::*;
        matches!(
            (from, transition),
            (Scheduled, CheckIn)
                | (WaitingRoom, Begin)
                | (InProgress, Complete)
                | (Scheduled | WaitingRoom | Rescheduled, CancelByPatient)
                | (Scheduled | WaitingRoom | Rescheduled, CancelByProvider)
                | (Scheduled | WaitingRoom, MarkNoShow)
                | (Scheduled | WaitingRoom, Reschedule)
                | (Rescheduled, Rebook)
        )
    }

    #[test]
    fn test_full_legality_matrix() {
        for from in ALL_STATUSES {
            for transition in ALL_TRANSITIONS {
                let mut appt = appointment_in(from);
                let result = appt.apply(transition, Utc::now());

                if is_legal(from, transition) {
                    assert!(
                        result.is_ok(),
                        "{:?} should allow {}",
                        from,
                        transition.name()
                    );
                } else {
                    assert_eq!(
                        result,
                        Err(InvalidTransition {
                            from,
                            attempted: transition.name()
                        }),
                        "{:?} should reject {}",
                        from,
                        transition.name()
                    );
                    assert_eq!(appt.status, from, "failed transition must not mutate state");
                }
            }
        }
    }

    #[test]
    fn test_happy_path_to_completion() {
        let mut appt = appointment_in(AppointmentStatus::Scheduled);
        let now = Utc::now();

        appt.check_in(now).unwrap();
        appt.begin(now).unwrap();
        appt.complete(now).unwrap();

        assert_eq!(appt.status, AppointmentStatus::Completed);
        assert!(appt.status.is_terminal());
    }

    #[test]
    fn test_complete_rejected_after_patient_cancellation() {
        let mut appt = appointment_in(AppointmentStatus::CanceledByPatient);

        let err = appt.complete(Utc::now()).unwrap_err();
        assert_eq!(err.from, AppointmentStatus::CanceledByPatient);
        assert_eq!(appt.status, AppointmentStatus::CanceledByPatient);
    }

    #[test]
    fn test_terminal_states_are_stable() {
        for status in ALL_STATUSES.into_iter().filter(|s| s.is_terminal()) {
            for transition in ALL_TRANSITIONS {
                let mut appt = appointment_in(status);
                assert!(
                    appt.apply(transition, Utc::now()).is_err(),
                    "{:?} is terminal but allowed {}",
                    status,
                    transition.name()
                );
                assert_eq!(appt.status, status);
            }
        }
    }

    #[test]
    fn test_reschedule_then_rebook_reenters_flow() {
        let mut appt = appointment_in(AppointmentStatus::Scheduled);
        let now = Utc::now();

        appt.reschedule(now).unwrap();
        assert_eq!(appt.status, AppointmentStatus::Rescheduled);

        appt.rebook(now).unwrap();
        assert_eq!(appt.status, AppointmentStatus::Scheduled);

        appt.check_in(now).unwrap();
        assert_eq!(appt.status, AppointmentStatus::WaitingRoom);
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in ALL_STATUSES {
            assert_eq!(AppointmentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AppointmentStatus::parse("NOT_A_STATUS"), None);
    }

    #[test]
    fn test_transition_stamps_status_changed_at() {
        let mut appt = appointment_in(AppointmentStatus::Scheduled);
        let before = appt.status_changed_at;
        let now = before + chrono::Duration::minutes(5);

        appt.check_in(now).unwrap();
        assert_eq!(appt.status_changed_at, now);
    }
}
