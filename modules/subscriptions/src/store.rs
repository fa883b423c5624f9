//! Subscription persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::lifecycle::{InvalidTransition, SubscriptionStatus, SubscriptionTransition};
use crate::models::Subscription;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("subscription {0} not found")]
    NotFound(i64),

    #[error("no subscription for external ref {0}")]
    UnknownExternalRef(String),

    #[error("no subscription for provider {0}")]
    NoSubscriptionForProvider(i64),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error("subscription store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Subscription, StoreError>;

    async fn get_by_external_ref(&self, external_ref: &str) -> Result<Subscription, StoreError>;

    async fn get_by_provider(&self, provider_id: i64) -> Result<Option<Subscription>, StoreError>;

    async fn insert(&self, subscription: &Subscription) -> Result<(), StoreError>;

    /// Create an INCOMPLETE shell for the provider unless one already exists.
    /// Returns `true` when a row was created.
    async fn create_shell_if_absent(
        &self,
        provider_id: i64,
        plan_id: i64,
    ) -> Result<bool, StoreError>;

    /// Atomically apply a lifecycle transition, returning the updated row.
    async fn apply(
        &self,
        id: i64,
        transition: SubscriptionTransition,
        now: DateTime<Utc>,
    ) -> Result<Subscription, StoreError>;

    /// Count one more visit against the provider's subscription; returns the
    /// new usage total.
    async fn increment_usage(&self, provider_id: i64) -> Result<i64, StoreError>;

    /// Record a plan change, returning the previous plan id.
    async fn set_plan(&self, id: i64, plan_id: i64) -> Result<i64, StoreError>;
}

/// Store backed by a process-local map (dev/test)
pub struct InMemorySubscriptionStore {
    subscriptions: Mutex<HashMap<i64, Subscription>>,
    next_id: Mutex<i64>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            next_id: Mutex::new(1),
        }
    }
}

impl Default for InMemorySubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn get(&self, id: i64) -> Result<Subscription, StoreError> {
        let subs = self.subscriptions.lock().await;
        subs.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn get_by_external_ref(&self, external_ref: &str) -> Result<Subscription, StoreError> {
        let subs = self.subscriptions.lock().await;
        subs.values()
            .find(|s| s.external_ref.as_deref() == Some(external_ref))
            .cloned()
            .ok_or_else(|| StoreError::UnknownExternalRef(external_ref.to_string()))
    }

    async fn get_by_provider(&self, provider_id: i64) -> Result<Option<Subscription>, StoreError> {
        let subs = self.subscriptions.lock().await;
        Ok(subs.values().find(|s| s.provider_id == provider_id).cloned())
    }

    async fn insert(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let mut subs = self.subscriptions.lock().await;
        subs.insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn create_shell_if_absent(
        &self,
        provider_id: i64,
        plan_id: i64,
    ) -> Result<bool, StoreError> {
        let mut subs = self.subscriptions.lock().await;
        if subs.values().any(|s| s.provider_id == provider_id) {
            return Ok(false);
        }

        let mut next_id = self.next_id.lock().await;
        let id = *next_id;
        *next_id += 1;

        subs.insert(id, Subscription::new(id, provider_id, plan_id));
        Ok(true)
    }

    async fn apply(
        &self,
        id: i64,
        transition: SubscriptionTransition,
        now: DateTime<Utc>,
    ) -> Result<Subscription, StoreError> {
        let mut subs = self.subscriptions.lock().await;
        let sub = subs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        sub.apply(transition, now)?;
        Ok(sub.clone())
    }

    async fn increment_usage(&self, provider_id: i64) -> Result<i64, StoreError> {
        let mut subs = self.subscriptions.lock().await;
        let sub = subs
            .values_mut()
            .find(|s| s.provider_id == provider_id)
            .ok_or(StoreError::NoSubscriptionForProvider(provider_id))?;
        sub.appointments_used += 1;
        Ok(sub.appointments_used)
    }

    async fn set_plan(&self, id: i64, plan_id: i64) -> Result<i64, StoreError> {
        let mut subs = self.subscriptions.lock().await;
        let sub = subs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let previous = sub.plan_id;
        sub.plan_id = plan_id;
        Ok(previous)
    }
}

/// Store backed by the module's `subscriptions` table
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &sqlx::postgres::PgRow) -> Result<Subscription, StoreError> {
        let status_str: String = row.try_get("status")?;
        let status = SubscriptionStatus::parse(&status_str).ok_or_else(|| {
            StoreError::Unavailable(format!("unknown status in storage: {}", status_str))
        })?;

        Ok(Subscription {
            id: row.try_get("id")?,
            provider_id: row.try_get("provider_id")?,
            plan_id: row.try_get("plan_id")?,
            status,
            external_ref: row.try_get("external_ref")?,
            appointments_used: row.try_get("appointments_used")?,
            status_changed_at: row.try_get("status_changed_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

const SELECT_COLUMNS: &str = "id, provider_id, plan_id, status, external_ref, \
                              appointments_used, status_changed_at, created_at";

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn get(&self, id: i64) -> Result<Subscription, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE id = $1",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        Self::map_row(&row)
    }

    async fn get_by_external_ref(&self, external_ref: &str) -> Result<Subscription, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE external_ref = $1",
            SELECT_COLUMNS
        ))
        .bind(external_ref)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::UnknownExternalRef(external_ref.to_string()))?;

        Self::map_row(&row)
    }

    async fn get_by_provider(&self, provider_id: i64) -> Result<Option<Subscription>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE provider_id = $1",
            SELECT_COLUMNS
        ))
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn insert(&self, subscription: &Subscription) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (id, provider_id, plan_id, status, external_ref, appointments_used,
                 status_changed_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.provider_id)
        .bind(subscription.plan_id)
        .bind(subscription.status.as_str())
        .bind(&subscription.external_ref)
        .bind(subscription.appointments_used)
        .bind(subscription.status_changed_at)
        .bind(subscription.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_shell_if_absent(
        &self,
        provider_id: i64,
        plan_id: i64,
    ) -> Result<bool, StoreError> {
        // Unique index on provider_id makes this race-safe.
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (provider_id, plan_id, status)
            VALUES ($1, $2, 'INCOMPLETE')
            ON CONFLICT (provider_id) DO NOTHING
            "#,
        )
        .bind(provider_id)
        .bind(plan_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn apply(
        &self,
        id: i64,
        transition: SubscriptionTransition,
        now: DateTime<Utc>,
    ) -> Result<Subscription, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE id = $1 FOR UPDATE",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        let mut subscription = Self::map_row(&row)?;
        subscription.apply(transition, now)?;

        sqlx::query(
            "UPDATE subscriptions SET status = $2, status_changed_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(subscription.status.as_str())
        .bind(subscription.status_changed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(subscription)
    }

    async fn increment_usage(&self, provider_id: i64) -> Result<i64, StoreError> {
        let used: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE subscriptions
            SET appointments_used = appointments_used + 1
            WHERE provider_id = $1
            RETURNING appointments_used
            "#,
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;

        used.ok_or(StoreError::NoSubscriptionForProvider(provider_id))
    }

    async fn set_plan(&self, id: i64, plan_id: i64) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let previous: Option<i64> =
            sqlx::query_scalar("SELECT plan_id FROM subscriptions WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let previous = previous.ok_or(StoreError::NotFound(id))?;

        sqlx::query("UPDATE subscriptions SET plan_id = $2 WHERE id = $1")
            .bind(id)
            .bind(plan_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(previous)
    }
}
