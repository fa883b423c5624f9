//! Checklist persistence
//!
//! The Postgres implementation keeps one row per checklist plus one row per
//! step; creation inserts both under `ON CONFLICT DO NOTHING` so racing
//! registration events cannot overwrite an existing checklist.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::lifecycle::{InvalidTransition, OnboardingStep, StepStatus, StepTransition};
use crate::models::{Checklist, StepKind};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no checklist for provider {0}")]
    NotFound(i64),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error("checklist store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

#[async_trait]
pub trait ChecklistStore: Send + Sync {
    async fn get(&self, provider_id: i64) -> Result<Option<Checklist>, StoreError>;

    /// Create a checklist with all steps PENDING unless one already exists.
    /// An existing checklist is never touched. Returns `true` on creation.
    async fn create_if_absent(
        &self,
        provider_id: i64,
        selected_plan_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Atomically apply a step transition.
    async fn apply_step(
        &self,
        provider_id: i64,
        kind: StepKind,
        transition: StepTransition,
        now: DateTime<Utc>,
    ) -> Result<Checklist, StoreError>;

    /// Drive a step to COMPLETED from any open state; a step already in a
    /// terminal state is left alone. Returns `true` when the step changed.
    async fn approve_step_if_open(
        &self,
        provider_id: i64,
        kind: StepKind,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn set_plan(&self, provider_id: i64, plan_id: i64) -> Result<(), StoreError>;

    /// Remove the provider's checklist. Returns `true` when one existed.
    async fn remove(&self, provider_id: i64) -> Result<bool, StoreError>;
}

/// Steps that can still be driven to COMPLETED, and the path there.
fn approval_path(status: StepStatus) -> Option<&'static [StepTransition]> {
    match status {
        StepStatus::Pending | StepStatus::ActionRequired => {
            Some(&[StepTransition::Start, StepTransition::Approve])
        }
        StepStatus::InProgress | StepStatus::UnderReview => Some(&[StepTransition::Approve]),
        StepStatus::Completed | StepStatus::Rejected | StepStatus::NotRequired => None,
    }
}

/// Store backed by a process-local map (dev/test)
pub struct InMemoryChecklistStore {
    checklists: Mutex<HashMap<i64, Checklist>>,
}

impl InMemoryChecklistStore {
    pub fn new() -> Self {
        Self {
            checklists: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryChecklistStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChecklistStore for InMemoryChecklistStore {
    async fn get(&self, provider_id: i64) -> Result<Option<Checklist>, StoreError> {
        let checklists = self.checklists.lock().await;
        Ok(checklists.get(&provider_id).cloned())
    }

    async fn create_if_absent(
        &self,
        provider_id: i64,
        selected_plan_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut checklists = self.checklists.lock().await;
        if checklists.contains_key(&provider_id) {
            return Ok(false);
        }
        checklists.insert(provider_id, Checklist::new(provider_id, selected_plan_id, now));
        Ok(true)
    }

    async fn apply_step(
        &self,
        provider_id: i64,
        kind: StepKind,
        transition: StepTransition,
        now: DateTime<Utc>,
    ) -> Result<Checklist, StoreError> {
        let mut checklists = self.checklists.lock().await;
        let checklist = checklists
            .get_mut(&provider_id)
            .ok_or(StoreError::NotFound(provider_id))?;
        let step = checklist
            .steps
            .get_mut(&kind)
            .ok_or(StoreError::NotFound(provider_id))?;
        step.apply(transition, now)?;
        Ok(checklist.clone())
    }

    async fn approve_step_if_open(
        &self,
        provider_id: i64,
        kind: StepKind,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut checklists = self.checklists.lock().await;
        let checklist = checklists
            .get_mut(&provider_id)
            .ok_or(StoreError::NotFound(provider_id))?;
        let step = checklist
            .steps
            .get_mut(&kind)
            .ok_or(StoreError::NotFound(provider_id))?;

        let Some(path) = approval_path(step.status) else {
            return Ok(false);
        };
        for transition in path {
            step.apply(*transition, now)?;
        }
        Ok(true)
    }

    async fn set_plan(&self, provider_id: i64, plan_id: i64) -> Result<(), StoreError> {
        let mut checklists = self.checklists.lock().await;
        let checklist = checklists
            .get_mut(&provider_id)
            .ok_or(StoreError::NotFound(provider_id))?;
        checklist.selected_plan_id = Some(plan_id);
        Ok(())
    }

    async fn remove(&self, provider_id: i64) -> Result<bool, StoreError> {
        let mut checklists = self.checklists.lock().await;
        Ok(checklists.remove(&provider_id).is_some())
    }
}

/// Store backed by `onboarding_checklists` + `onboarding_steps`
pub struct PgChecklistStore {
    pool: PgPool,
}

impl PgChecklistStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load<'e, E>(executor: E, provider_id: i64) -> Result<Option<Checklist>, StoreError>
    where
        E: sqlx::PgExecutor<'e> + Copy,
    {
        let header = sqlx::query(
            r#"
            SELECT provider_id, selected_plan_id, created_at
            FROM onboarding_checklists
            WHERE provider_id = $1
            "#,
        )
        .bind(provider_id)
        .fetch_optional(executor)
        .await?;

        let Some(header) = header else {
            return Ok(None);
        };

        let step_rows = sqlx::query(
            r#"
            SELECT step, status, status_changed_at
            FROM onboarding_steps
            WHERE provider_id = $1
            "#,
        )
        .bind(provider_id)
        .fetch_all(executor)
        .await?;

        let mut steps = std::collections::BTreeMap::new();
        for row in &step_rows {
            let kind_str: String = row.try_get("step")?;
            let status_str: String = row.try_get("status")?;
            let kind = StepKind::parse(&kind_str).ok_or_else(|| {
                StoreError::Unavailable(format!("unknown step in storage: {}", kind_str))
            })?;
            let status = StepStatus::parse(&status_str).ok_or_else(|| {
                StoreError::Unavailable(format!("unknown status in storage: {}", status_str))
            })?;
            steps.insert(
                kind,
                OnboardingStep {
                    status,
                    status_changed_at: row.try_get("status_changed_at")?,
                },
            );
        }

        Ok(Some(Checklist {
            provider_id: header.try_get("provider_id")?,
            steps,
            selected_plan_id: header.try_get("selected_plan_id")?,
            created_at: header.try_get("created_at")?,
        }))
    }

    /// Lock one step row and return its status.
    async fn lock_step(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        provider_id: i64,
        kind: StepKind,
    ) -> Result<StepStatus, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT status
            FROM onboarding_steps
            WHERE provider_id = $1 AND step = $2
            FOR UPDATE
            "#,
        )
        .bind(provider_id)
        .bind(kind.as_str())
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StoreError::NotFound(provider_id))?;

        let status_str: String = row.try_get("status")?;
        StepStatus::parse(&status_str).ok_or_else(|| {
            StoreError::Unavailable(format!("unknown status in storage: {}", status_str))
        })
    }

    async fn write_step(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        provider_id: i64,
        kind: StepKind,
        status: StepStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE onboarding_steps
            SET status = $3, status_changed_at = $4
            WHERE provider_id = $1 AND step = $2
            "#,
        )
        .bind(provider_id)
        .bind(kind.as_str())
        .bind(status.as_str())
        .bind(now)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ChecklistStore for PgChecklistStore {
    async fn get(&self, provider_id: i64) -> Result<Option<Checklist>, StoreError> {
        Self::load(&self.pool, provider_id).await
    }

    async fn create_if_absent(
        &self,
        provider_id: i64,
        selected_plan_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO onboarding_checklists (provider_id, selected_plan_id, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (provider_id) DO NOTHING
            "#,
        )
        .bind(provider_id)
        .bind(selected_plan_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for kind in StepKind::ALL {
            sqlx::query(
                r#"
                INSERT INTO onboarding_steps (provider_id, step, status, status_changed_at)
                VALUES ($1, $2, 'PENDING', $3)
                "#,
            )
            .bind(provider_id)
            .bind(kind.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn apply_step(
        &self,
        provider_id: i64,
        kind: StepKind,
        transition: StepTransition,
        now: DateTime<Utc>,
    ) -> Result<Checklist, StoreError> {
        let mut tx = self.pool.begin().await?;

        let status = Self::lock_step(&mut tx, provider_id, kind).await?;
        let next = crate::lifecycle::apply_transition(status, transition)?;
        Self::write_step(&mut tx, provider_id, kind, next, now).await?;

        tx.commit().await?;

        self.get(provider_id)
            .await?
            .ok_or(StoreError::NotFound(provider_id))
    }

    async fn approve_step_if_open(
        &self,
        provider_id: i64,
        kind: StepKind,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let mut status = Self::lock_step(&mut tx, provider_id, kind).await?;
        let Some(path) = approval_path(status) else {
            tx.rollback().await?;
            return Ok(false);
        };

        for transition in path {
            status = crate::lifecycle::apply_transition(status, *transition)?;
        }
        Self::write_step(&mut tx, provider_id, kind, status, now).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn set_plan(&self, provider_id: i64, plan_id: i64) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE onboarding_checklists SET selected_plan_id = $2 WHERE provider_id = $1",
        )
        .bind(provider_id)
        .bind(plan_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(provider_id));
        }
        Ok(())
    }

    async fn remove(&self, provider_id: i64) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM onboarding_steps WHERE provider_id = $1")
            .bind(provider_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM onboarding_checklists WHERE provider_id = $1")
            .bind(provider_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
