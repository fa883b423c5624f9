//! Transactional outbox and background relay
//!
//! Module binaries publish through the outbox so the cause (a committed state
//! write) always precedes its observable effect (the event on the bus): the
//! envelope is stored in `events_outbox` and a background relay task polls
//! unpublished rows, publishes them and stamps `published_at`. Delivery stays
//! at-least-once — a crash between publish and stamp redelivers, which is why
//! the envelope keeps its event id across retries.
//!
//! Expected table:
//!
//! ```sql
//! CREATE TABLE events_outbox (
//!     id           BIGSERIAL PRIMARY KEY,
//!     event_id     UUID        NOT NULL UNIQUE,
//!     subject      TEXT        NOT NULL,
//!     payload      JSONB       NOT NULL,
//!     created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     published_at TIMESTAMPTZ
//! );
//! ```

use crate::{EventBus, EventEnvelope, EventPublisher};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Outbox row awaiting (or after) publication
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutboxRecord {
    pub id: i64,
    pub event_id: Uuid,
    pub subject: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Enqueue an envelope for later delivery.
///
/// Duplicate event ids are ignored so a retried caller cannot enqueue the same
/// logical event twice.
pub async fn enqueue_event(pool: &PgPool, envelope: &EventEnvelope) -> Result<(), sqlx::Error> {
    let payload =
        serde_json::to_value(envelope).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    sqlx::query(
        r#"
        INSERT INTO events_outbox (event_id, subject, payload)
        VALUES ($1, $2, $3)
        ON CONFLICT (event_id) DO NOTHING
        "#,
    )
    .bind(envelope.event_id)
    .bind(envelope.subject())
    .bind(payload)
    .execute(pool)
    .await?;

    tracing::debug!(
        event_id = %envelope.event_id,
        subject = %envelope.subject(),
        "Enqueued event to outbox"
    );

    Ok(())
}

/// Fetch unpublished events from the outbox, oldest first
pub async fn fetch_unpublished_events(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<OutboxRecord>, sqlx::Error> {
    sqlx::query_as::<_, OutboxRecord>(
        r#"
        SELECT id, event_id, subject, payload, created_at, published_at
        FROM events_outbox
        WHERE published_at IS NULL
        ORDER BY created_at ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Mark an outbox row as published
pub async fn mark_as_published(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE events_outbox
        SET published_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// [`EventPublisher`] that stores envelopes in the outbox.
///
/// Fail-open like every publisher: a storage error is logged and swallowed.
/// The relay task owns actual bus delivery.
pub struct OutboxPublisher {
    pool: PgPool,
}

impl OutboxPublisher {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventPublisher for OutboxPublisher {
    async fn publish(&self, envelope: &EventEnvelope) {
        if let Err(e) = enqueue_event(&self.pool, envelope).await {
            tracing::error!(
                event_id = %envelope.event_id,
                event_type = %envelope.event_type,
                error = %e,
                "Failed to enqueue event to outbox, event dropped"
            );
        }
    }
}

/// Background task that relays outbox rows to the event bus.
///
/// Rows that fail to publish keep `published_at` NULL and are retried on the
/// next tick.
pub async fn run_relay(pool: PgPool, bus: Arc<dyn EventBus>) {
    tracing::info!("Starting outbox relay task");

    let mut interval = tokio::time::interval(Duration::from_secs(1));

    loop {
        interval.tick().await;

        match relay_batch(&pool, &bus).await {
            Ok(count) if count > 0 => {
                tracing::debug!(count, "Relayed events from outbox");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "Error relaying outbox events");
            }
        }
    }
}

async fn relay_batch(
    pool: &PgPool,
    bus: &Arc<dyn EventBus>,
) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
    let records = fetch_unpublished_events(pool, 100).await?;

    let mut published = 0;

    for record in records {
        let payload = serde_json::to_vec(&record.payload)?;

        match bus.publish(&record.subject, payload).await {
            Ok(()) => {
                mark_as_published(pool, record.id).await?;
                published += 1;
                tracing::trace!(
                    event_id = %record.event_id,
                    subject = %record.subject,
                    "Outbox event published"
                );
            }
            Err(e) => {
                // Leave unpublished; the next tick retries with the same
                // envelope (and the same event id).
                tracing::error!(
                    event_id = %record.event_id,
                    subject = %record.subject,
                    error = %e,
                    "Failed to publish outbox event"
                );
            }
        }
    }

    Ok(published)
}
