//! Delivery persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::lifecycle::{DeliveryStatus, InvalidTransition};
use crate::models::{NotificationDelivery, NotificationKind};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("delivery {0} not found")]
    NotFound(i64),

    #[error("no delivery for provider message id {0}")]
    UnknownProviderMessageId(String),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error("delivery store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Webhook-reported delivery outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Bounced,
}

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Insert a fresh PENDING delivery and return it with its assigned id.
    async fn create(
        &self,
        kind: NotificationKind,
        recipient_user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<NotificationDelivery, StoreError>;

    async fn get(&self, id: i64) -> Result<NotificationDelivery, StoreError>;

    /// PENDING → SENT with the provider's message id.
    async fn mark_sent(
        &self,
        id: i64,
        provider_message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<NotificationDelivery, StoreError>;

    /// PENDING → FAILED, counting the attempt.
    async fn mark_failed(&self, id: i64, now: DateTime<Utc>)
        -> Result<NotificationDelivery, StoreError>;

    /// Apply a webhook outcome to the delivery correlated by provider message
    /// id: SENT → DELIVERED or SENT → BOUNCED.
    async fn apply_outcome(
        &self,
        provider_message_id: &str,
        outcome: DeliveryOutcome,
        now: DateTime<Utc>,
    ) -> Result<NotificationDelivery, StoreError>;

    /// FAILED → PENDING for every delivery still under the attempt ceiling;
    /// returns the requeued deliveries for re-sending.
    async fn requeue_failed(
        &self,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationDelivery>, StoreError>;
}

/// Store backed by a process-local map (dev/test)
pub struct InMemoryDeliveryStore {
    deliveries: Mutex<HashMap<i64, NotificationDelivery>>,
    next_id: Mutex<i64>,
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self {
            deliveries: Mutex::new(HashMap::new()),
            next_id: Mutex::new(1),
        }
    }
}

impl Default for InMemoryDeliveryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryStore for InMemoryDeliveryStore {
    async fn create(
        &self,
        kind: NotificationKind,
        recipient_user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<NotificationDelivery, StoreError> {
        let mut next_id = self.next_id.lock().await;
        let id = *next_id;
        *next_id += 1;
        drop(next_id);

        let delivery = NotificationDelivery::new(id, kind, recipient_user_id, now);
        self.deliveries.lock().await.insert(id, delivery.clone());
        Ok(delivery)
    }

    async fn get(&self, id: i64) -> Result<NotificationDelivery, StoreError> {
        let deliveries = self.deliveries.lock().await;
        deliveries.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn mark_sent(
        &self,
        id: i64,
        provider_message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<NotificationDelivery, StoreError> {
        let mut deliveries = self.deliveries.lock().await;
        let delivery = deliveries.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        delivery.mark_sent(provider_message_id, now)?;
        Ok(delivery.clone())
    }

    async fn mark_failed(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<NotificationDelivery, StoreError> {
        let mut deliveries = self.deliveries.lock().await;
        let delivery = deliveries.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        delivery.mark_failed(now)?;
        Ok(delivery.clone())
    }

    async fn apply_outcome(
        &self,
        provider_message_id: &str,
        outcome: DeliveryOutcome,
        now: DateTime<Utc>,
    ) -> Result<NotificationDelivery, StoreError> {
        let mut deliveries = self.deliveries.lock().await;
        let delivery = deliveries
            .values_mut()
            .find(|d| d.provider_message_id.as_deref() == Some(provider_message_id))
            .ok_or_else(|| {
                StoreError::UnknownProviderMessageId(provider_message_id.to_string())
            })?;

        match outcome {
            DeliveryOutcome::Delivered => delivery.mark_delivered(now)?,
            DeliveryOutcome::Bounced => delivery.mark_bounced(now)?,
        }
        Ok(delivery.clone())
    }

    async fn requeue_failed(
        &self,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationDelivery>, StoreError> {
        let mut deliveries = self.deliveries.lock().await;
        let mut requeued = Vec::new();

        for delivery in deliveries.values_mut() {
            if delivery.status == DeliveryStatus::Failed && delivery.retry_count < max_attempts {
                delivery.requeue(max_attempts, now)?;
                requeued.push(delivery.clone());
            }
        }

        requeued.sort_by_key(|d| d.id);
        Ok(requeued)
    }
}

/// Store backed by the module's `notification_deliveries` table
pub struct PgDeliveryStore {
    pool: PgPool,
}

impl PgDeliveryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &sqlx::postgres::PgRow) -> Result<NotificationDelivery, StoreError> {
        let status_str: String = row.try_get("status")?;
        let kind_str: String = row.try_get("kind")?;
        let status = DeliveryStatus::parse(&status_str).ok_or_else(|| {
            StoreError::Unavailable(format!("unknown status in storage: {}", status_str))
        })?;
        let kind = NotificationKind::parse(&kind_str).ok_or_else(|| {
            StoreError::Unavailable(format!("unknown kind in storage: {}", kind_str))
        })?;

        Ok(NotificationDelivery {
            id: row.try_get("id")?,
            kind,
            recipient_user_id: row.try_get("recipient_user_id")?,
            status,
            provider_message_id: row.try_get("provider_message_id")?,
            retry_count: row.try_get("retry_count")?,
            status_changed_at: row.try_get("status_changed_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn lock_and_update<F>(
        &self,
        select_sql: &str,
        bind: &str,
        mutate: F,
    ) -> Result<NotificationDelivery, StoreError>
    where
        F: FnOnce(&mut NotificationDelivery) -> Result<(), StoreError>,
    {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(select_sql)
            .bind(bind)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return Err(StoreError::UnknownProviderMessageId(bind.to_string()));
        };

        let mut delivery = Self::map_row(&row)?;
        mutate(&mut delivery)?;

        sqlx::query(
            r#"
            UPDATE notification_deliveries
            SET status = $2, provider_message_id = $3, retry_count = $4, status_changed_at = $5
            WHERE id = $1
            "#,
        )
        .bind(delivery.id)
        .bind(delivery.status.as_str())
        .bind(&delivery.provider_message_id)
        .bind(delivery.retry_count)
        .bind(delivery.status_changed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(delivery)
    }

    async fn update_by_id<F>(&self, id: i64, mutate: F) -> Result<NotificationDelivery, StoreError>
    where
        F: FnOnce(&mut NotificationDelivery) -> Result<(), StoreError>,
    {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, kind, recipient_user_id, status, provider_message_id, retry_count,
                   status_changed_at, created_at
            FROM notification_deliveries
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        let mut delivery = Self::map_row(&row)?;
        mutate(&mut delivery)?;

        sqlx::query(
            r#"
            UPDATE notification_deliveries
            SET status = $2, provider_message_id = $3, retry_count = $4, status_changed_at = $5
            WHERE id = $1
            "#,
        )
        .bind(delivery.id)
        .bind(delivery.status.as_str())
        .bind(&delivery.provider_message_id)
        .bind(delivery.retry_count)
        .bind(delivery.status_changed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(delivery)
    }
}

#[async_trait]
impl DeliveryStore for PgDeliveryStore {
    async fn create(
        &self,
        kind: NotificationKind,
        recipient_user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<NotificationDelivery, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO notification_deliveries
                (kind, recipient_user_id, status, retry_count, status_changed_at, created_at)
            VALUES ($1, $2, 'PENDING', 0, $3, $3)
            RETURNING id
            "#,
        )
        .bind(kind.as_str())
        .bind(recipient_user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(NotificationDelivery::new(id, kind, recipient_user_id, now))
    }

    async fn get(&self, id: i64) -> Result<NotificationDelivery, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, kind, recipient_user_id, status, provider_message_id, retry_count,
                   status_changed_at, created_at
            FROM notification_deliveries
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        Self::map_row(&row)
    }

    async fn mark_sent(
        &self,
        id: i64,
        provider_message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<NotificationDelivery, StoreError> {
        self.update_by_id(id, |d| Ok(d.mark_sent(provider_message_id, now)?))
            .await
    }

    async fn mark_failed(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<NotificationDelivery, StoreError> {
        self.update_by_id(id, |d| Ok(d.mark_failed(now)?)).await
    }

    async fn apply_outcome(
        &self,
        provider_message_id: &str,
        outcome: DeliveryOutcome,
        now: DateTime<Utc>,
    ) -> Result<NotificationDelivery, StoreError> {
        self.lock_and_update(
            r#"
            SELECT id, kind, recipient_user_id, status, provider_message_id, retry_count,
                   status_changed_at, created_at
            FROM notification_deliveries
            WHERE provider_message_id = $1
            FOR UPDATE
            "#,
            provider_message_id,
            |d| {
                match outcome {
                    DeliveryOutcome::Delivered => d.mark_delivered(now)?,
                    DeliveryOutcome::Bounced => d.mark_bounced(now)?,
                }
                Ok(())
            },
        )
        .await
    }

    async fn requeue_failed(
        &self,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationDelivery>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, kind, recipient_user_id, status, provider_message_id, retry_count,
                   status_changed_at, created_at
            FROM notification_deliveries
            WHERE status = 'FAILED' AND retry_count < $1
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(max_attempts)
        .fetch_all(&mut *tx)
        .await?;

        let mut requeued = Vec::with_capacity(rows.len());

        for row in &rows {
            let mut delivery = Self::map_row(row)?;
            delivery.requeue(max_attempts, now)?;

            sqlx::query(
                r#"
                UPDATE notification_deliveries
                SET status = 'PENDING', status_changed_at = $2
                WHERE id = $1
                "#,
            )
            .bind(delivery.id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            requeued.push(delivery);
        }

        tx.commit().await?;
        Ok(requeued)
    }
}
