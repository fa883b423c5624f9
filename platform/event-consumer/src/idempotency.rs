//! Per-consumer idempotency guard
//!
//! The guard is what makes at-least-once delivery safe at the edge. The
//! dispatcher checks `seen` before running a handler and records the id only
//! after the handler finishes, so a crash mid-handling never strands an
//! unapplied event behind a guard row; webhooks record first and `forget` on
//! transient failure so the provider's retry re-applies.
//!
//! Keys are plain strings so bus event ids (UUIDs) and provider-assigned
//! webhook ids share one dedup discipline.
//!
//! Expected table for the Postgres implementation:
//!
//! ```sql
//! CREATE TABLE processed_events (
//!     event_id     TEXT        PRIMARY KEY,
//!     event_type   TEXT        NOT NULL,
//!     processor    TEXT        NOT NULL,
//!     processed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Mutex;

/// Errors from the guard's backing store
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("idempotency store unavailable: {0}")]
    Unavailable(String),
}

/// Atomic seen/record checks keyed by event id
#[async_trait]
pub trait IdempotencyGuard: Send + Sync {
    /// Atomically record the id if unseen.
    ///
    /// Returns `true` exactly once per id: the first recorder wins, every
    /// other caller treats the event as already handled.
    async fn check_and_record(&self, event_id: &str, event_type: &str)
        -> Result<bool, GuardError>;

    /// Whether the id has been recorded
    async fn seen(&self, event_id: &str) -> Result<bool, GuardError>;

    /// Remove a recorded id.
    ///
    /// Used when a side effect fails transiently after `check_and_record`
    /// passed (the webhook path), so the next delivery gets a fresh chance to
    /// apply it.
    async fn forget(&self, event_id: &str) -> Result<(), GuardError>;
}

/// Guard backed by a process-local set (dev/test, bus-disabled mode)
pub struct InMemoryGuard {
    seen: Mutex<HashSet<String>>,
}

impl InMemoryGuard {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
        }
    }
}

impl Default for InMemoryGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotencyGuard for InMemoryGuard {
    async fn check_and_record(
        &self,
        event_id: &str,
        _event_type: &str,
    ) -> Result<bool, GuardError> {
        let mut seen = self
            .seen
            .lock()
            .map_err(|e| GuardError::Unavailable(e.to_string()))?;
        // HashSet::insert is the atomic check-and-record under the lock.
        Ok(seen.insert(event_id.to_string()))
    }

    async fn seen(&self, event_id: &str) -> Result<bool, GuardError> {
        let seen = self
            .seen
            .lock()
            .map_err(|e| GuardError::Unavailable(e.to_string()))?;
        Ok(seen.contains(event_id))
    }

    async fn forget(&self, event_id: &str) -> Result<(), GuardError> {
        let mut seen = self
            .seen
            .lock()
            .map_err(|e| GuardError::Unavailable(e.to_string()))?;
        seen.remove(event_id);
        Ok(())
    }
}

/// Guard backed by the module's `processed_events` table.
///
/// The unique constraint on `event_id` is the atomicity mechanism: the insert
/// either lands (first delivery) or conflicts away (duplicate), regardless of
/// how many workers race.
pub struct PgGuard {
    pool: PgPool,
    processor: String,
}

impl PgGuard {
    pub fn new(pool: PgPool, processor: &str) -> Self {
        Self {
            pool,
            processor: processor.to_string(),
        }
    }
}

#[async_trait]
impl IdempotencyGuard for PgGuard {
    async fn check_and_record(
        &self,
        event_id: &str,
        event_type: &str,
    ) -> Result<bool, GuardError> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, event_type, processor)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(&self.processor)
        .execute(&self.pool)
        .await
        .map_err(|e| GuardError::Unavailable(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn seen(&self, event_id: &str) -> Result<bool, GuardError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM processed_events WHERE event_id = $1)",
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| GuardError::Unavailable(e.to_string()))?;

        Ok(exists)
    }

    async fn forget(&self, event_id: &str) -> Result<(), GuardError> {
        sqlx::query("DELETE FROM processed_events WHERE event_id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await
            .map_err(|e| GuardError::Unavailable(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_delivery_passes_second_is_duplicate() {
        let guard = InMemoryGuard::new();

        assert!(guard.check_and_record("E1", "USER_REGISTERED").await.unwrap());
        assert!(!guard.check_and_record("E1", "USER_REGISTERED").await.unwrap());
        assert!(guard.seen("E1").await.unwrap());
    }

    #[tokio::test]
    async fn test_distinct_ids_are_independent() {
        let guard = InMemoryGuard::new();

        assert!(guard.check_and_record("E1", "USER_REGISTERED").await.unwrap());
        assert!(guard.check_and_record("E2", "USER_REGISTERED").await.unwrap());
    }

    #[tokio::test]
    async fn test_forget_allows_reapplication() {
        let guard = InMemoryGuard::new();

        assert!(guard.check_and_record("E1", "ITEM_CREATED").await.unwrap());
        guard.forget("E1").await.unwrap();
        assert!(guard.check_and_record("E1", "ITEM_CREATED").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_pass_exactly_once() {
        use std::sync::Arc;

        let guard = Arc::new(InMemoryGuard::new());
        let mut tasks = Vec::new();

        for _ in 0..16 {
            let guard = guard.clone();
            tasks.push(tokio::spawn(async move {
                guard.check_and_record("E1", "REVIEW_CREATED").await.unwrap()
            }));
        }

        let mut passed = 0;
        for task in tasks {
            if task.await.unwrap() {
                passed += 1;
            }
        }

        assert_eq!(passed, 1, "exactly one delivery may pass the guard");
    }
}
