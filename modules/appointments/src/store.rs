//! Appointment persistence
//!
//! The store owns the read-check-write cycle around lifecycle transitions so
//! concurrent consumers cannot interleave between the legality check and the
//! status write. The Postgres implementation serializes on `SELECT .. FOR
//! UPDATE`; the in-memory implementation serializes on a single mutex.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::lifecycle::{AppointmentStatus, AppointmentTransition, InvalidTransition};
use crate::models::Appointment;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("appointment {0} not found")]
    NotFound(i64),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error("appointment store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Appointment, StoreError>;

    async fn insert(&self, appointment: &Appointment) -> Result<(), StoreError>;

    /// Atomically apply a lifecycle transition to one appointment.
    ///
    /// Returns the updated appointment. An illegal transition fails with
    /// [`StoreError::Transition`] and leaves the row untouched.
    async fn apply(
        &self,
        id: i64,
        transition: AppointmentTransition,
        now: DateTime<Utc>,
    ) -> Result<Appointment, StoreError>;

    /// Cancel every upcoming appointment for a patient (provider-initiated,
    /// used when the patient account is deleted). Returns the ids canceled.
    async fn cancel_upcoming_for_patient(
        &self,
        patient_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>, StoreError>;
}

/// Store backed by a process-local map (dev/test)
pub struct InMemoryAppointmentStore {
    appointments: Mutex<HashMap<i64, Appointment>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self {
            appointments: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryAppointmentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn get(&self, id: i64) -> Result<Appointment, StoreError> {
        let appointments = self.appointments.lock().await;
        appointments.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn insert(&self, appointment: &Appointment) -> Result<(), StoreError> {
        let mut appointments = self.appointments.lock().await;
        appointments.insert(appointment.id, appointment.clone());
        Ok(())
    }

    async fn apply(
        &self,
        id: i64,
        transition: AppointmentTransition,
        now: DateTime<Utc>,
    ) -> Result<Appointment, StoreError> {
        let mut appointments = self.appointments.lock().await;
        let appointment = appointments.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        appointment.apply(transition, now)?;
        Ok(appointment.clone())
    }

    async fn cancel_upcoming_for_patient(
        &self,
        patient_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>, StoreError> {
        let mut appointments = self.appointments.lock().await;
        let mut canceled = Vec::new();

        for appointment in appointments.values_mut() {
            if appointment.patient_id == patient_id && appointment.is_upcoming() {
                appointment.cancel_by_provider(now)?;
                canceled.push(appointment.id);
            }
        }

        canceled.sort_unstable();
        Ok(canceled)
    }
}

/// Store backed by the module's `appointments` table
pub struct PgAppointmentStore {
    pool: PgPool,
}

impl PgAppointmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &sqlx::postgres::PgRow) -> Result<Appointment, StoreError> {
        let status_str: String = row.try_get("status")?;
        let status = AppointmentStatus::parse(&status_str).ok_or_else(|| {
            StoreError::Unavailable(format!("unknown status in storage: {}", status_str))
        })?;

        Ok(Appointment {
            id: row.try_get("id")?,
            patient_id: row.try_get("patient_id")?,
            provider_id: row.try_get("provider_id")?,
            status,
            scheduled_at: row.try_get("scheduled_at")?,
            status_changed_at: row.try_get("status_changed_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl AppointmentStore for PgAppointmentStore {
    async fn get(&self, id: i64) -> Result<Appointment, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, patient_id, provider_id, status, scheduled_at, status_changed_at, created_at
            FROM appointments
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        Self::map_row(&row)
    }

    async fn insert(&self, appointment: &Appointment) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO appointments
                (id, patient_id, provider_id, status, scheduled_at, status_changed_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(appointment.id)
        .bind(appointment.patient_id)
        .bind(appointment.provider_id)
        .bind(appointment.status.as_str())
        .bind(appointment.scheduled_at)
        .bind(appointment.status_changed_at)
        .bind(appointment.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn apply(
        &self,
        id: i64,
        transition: AppointmentTransition,
        now: DateTime<Utc>,
    ) -> Result<Appointment, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Row lock holds off concurrent transitions until this one commits.
        let row = sqlx::query(
            r#"
            SELECT id, patient_id, provider_id, status, scheduled_at, status_changed_at, created_at
            FROM appointments
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        let mut appointment = Self::map_row(&row)?;
        appointment.apply(transition, now)?;

        sqlx::query(
            r#"
            UPDATE appointments
            SET status = $2, status_changed_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(appointment.status.as_str())
        .bind(appointment.status_changed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(appointment)
    }

    async fn cancel_upcoming_for_patient(
        &self,
        patient_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, patient_id, provider_id, status, scheduled_at, status_changed_at, created_at
            FROM appointments
            WHERE patient_id = $1
              AND status IN ('SCHEDULED', 'WAITING_ROOM', 'RESCHEDULED')
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(patient_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut canceled = Vec::with_capacity(rows.len());

        for row in &rows {
            let mut appointment = Self::map_row(row)?;
            appointment.cancel_by_provider(now)?;

            sqlx::query(
                r#"
                UPDATE appointments
                SET status = $2, status_changed_at = $3
                WHERE id = $1
                "#,
            )
            .bind(appointment.id)
            .bind(appointment.status.as_str())
            .bind(appointment.status_changed_at)
            .execute(&mut *tx)
            .await?;

            canceled.push(appointment.id);
        }

        tx.commit().await?;
        Ok(canceled)
    }
}
