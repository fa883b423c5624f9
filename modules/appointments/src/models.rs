//! Appointment domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lifecycle::AppointmentStatus;

/// A booked visit between a patient and a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: i64,
    pub patient_id: i64,
    pub provider_id: i64,
    pub status: AppointmentStatus,
    /// When the visit is booked to take place
    pub scheduled_at: DateTime<Utc>,
    /// Stamped on every status change
    pub status_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Appointment {
    /// New appointment, born SCHEDULED
    pub fn new(id: i64, patient_id: i64, provider_id: i64, scheduled_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id,
            patient_id,
            provider_id,
            status: AppointmentStatus::Scheduled,
            scheduled_at,
            status_changed_at: now,
            created_at: now,
        }
    }

    /// Upcoming means the visit has not yet run its course or been closed out
    pub fn is_upcoming(&self) -> bool {
        matches!(
            self.status,
            AppointmentStatus::Scheduled
                | AppointmentStatus::WaitingRoom
                | AppointmentStatus::Rescheduled
        )
    }
}
