//! Dead-letter queue
//!
//! Terminal holding area for messages that cannot be processed and must not be
//! retried forever: malformed envelopes, permanent handler failures, and
//! transient failures whose retries were exhausted. Nothing is silently
//! dropped.
//!
//! Expected table for the Postgres implementation:
//!
//! ```sql
//! CREATE TABLE failed_events (
//!     event_id    TEXT        PRIMARY KEY,
//!     subject     TEXT        NOT NULL,
//!     payload     JSONB,
//!     error       TEXT        NOT NULL,
//!     retry_count INT         NOT NULL DEFAULT 0,
//!     failed_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::BusMessage;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::sync::Mutex;

/// A dead-lettered message
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub event_id: String,
    pub subject: String,
    pub payload: serde_json::Value,
    pub error: String,
    pub retry_count: i32,
    pub failed_at: DateTime<Utc>,
}

/// Sink for undeliverable messages
#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    /// Store a failed message. Implementations absorb their own failures
    /// (logged, not propagated) — DLQ trouble must never block the channel.
    async fn push(&self, msg: &BusMessage, error: &str, retry_count: i32);
}

/// Extract the event id from a raw message, falling back to a digest of the
/// bytes when the payload is too malformed to carry one. The fallback keeps
/// redeliveries of the same broken message collapsed onto one DLQ row.
fn dead_letter_key(msg: &BusMessage) -> (String, serde_json::Value) {
    match serde_json::from_slice::<serde_json::Value>(&msg.payload) {
        Ok(value) => {
            let key = value
                .get("eventId")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| digest_key(&msg.payload));
            (key, value)
        }
        Err(_) => (
            digest_key(&msg.payload),
            serde_json::Value::String(String::from_utf8_lossy(&msg.payload).into_owned()),
        ),
    }
}

fn digest_key(bytes: &[u8]) -> String {
    format!("raw-{:x}", Sha256::digest(bytes))
}

/// DLQ backed by the module's `failed_events` table
pub struct PgDeadLetterQueue {
    pool: PgPool,
}

impl PgDeadLetterQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeadLetterQueue for PgDeadLetterQueue {
    async fn push(&self, msg: &BusMessage, error: &str, retry_count: i32) {
        let (event_id, payload) = dead_letter_key(msg);

        let result = sqlx::query(
            r#"
            INSERT INTO failed_events (event_id, subject, payload, error, retry_count)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (event_id) DO UPDATE
            SET retry_count = EXCLUDED.retry_count,
                error = EXCLUDED.error,
                failed_at = NOW()
            "#,
        )
        .bind(&event_id)
        .bind(&msg.subject)
        .bind(&payload)
        .bind(error)
        .bind(retry_count)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::error!(
                    event_id = %event_id,
                    subject = %msg.subject,
                    retry_count,
                    error = %error,
                    "Event moved to DLQ"
                );
            }
            Err(dlq_err) => {
                tracing::error!(
                    event_id = %event_id,
                    subject = %msg.subject,
                    error = %error,
                    dlq_error = %dlq_err,
                    "Failed to write to DLQ - event may be lost!"
                );
            }
        }
    }
}

/// DLQ backed by a process-local vector (dev/test)
pub struct InMemoryDeadLetterQueue {
    letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self {
            letters: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of everything dead-lettered so far
    pub fn drain(&self) -> Vec<DeadLetter> {
        match self.letters.lock() {
            Ok(mut letters) => letters.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.letters.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryDeadLetterQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeadLetterQueue for InMemoryDeadLetterQueue {
    async fn push(&self, msg: &BusMessage, error: &str, retry_count: i32) {
        let (event_id, payload) = dead_letter_key(msg);

        tracing::error!(
            event_id = %event_id,
            subject = %msg.subject,
            retry_count,
            error = %error,
            "Event moved to DLQ"
        );

        if let Ok(mut letters) = self.letters.lock() {
            letters.push(DeadLetter {
                event_id,
                subject: msg.subject.clone(),
                payload,
                error: error.to_string(),
                retry_count,
                failed_at: Utc::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dead_letter_key_prefers_event_id() {
        let msg = BusMessage::new(
            "marketplace.events.USER_REGISTERED".to_string(),
            br#"{"eventId":"abc-123","eventType":"USER_REGISTERED"}"#.to_vec(),
        );

        let dlq = InMemoryDeadLetterQueue::new();
        dlq.push(&msg, "boom", 3).await;

        let letters = dlq.drain();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].event_id, "abc-123");
        assert_eq!(letters[0].retry_count, 3);
    }

    #[tokio::test]
    async fn test_unparseable_payload_gets_digest_key() {
        let msg = BusMessage::new(
            "marketplace.events.USER_REGISTERED".to_string(),
            b"not json at all".to_vec(),
        );

        let dlq = InMemoryDeadLetterQueue::new();
        dlq.push(&msg, "decode failure", 0).await;
        dlq.push(&msg, "decode failure", 0).await;

        let letters = dlq.drain();
        assert_eq!(letters.len(), 2);
        assert!(letters[0].event_id.starts_with("raw-"));
        // Same broken bytes map to the same key
        assert_eq!(letters[0].event_id, letters[1].event_id);
    }
}
