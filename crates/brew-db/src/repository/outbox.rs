//! # Outbox Repository
//!
//! Hand-off queue for work that must happen after a settlement commits
//! (receipt printing, kitchen display, notifications).
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   SINGLE SETTLEMENT TRANSACTION                         │
//! │                                                                         │
//! │  INSERT INTO orders ...                                                │
//! │  UPDATE ingredients ... / INSERT INTO stock_movements ...              │
//! │  UPDATE coupons ... / UPDATE members ...                               │
//! │  INSERT INTO outbox (entity_type, entity_id, payload)                  │
//! │       VALUES ('ORDER', ?, <order + items JSON>)                        │
//! │                                                                         │
//! │  COMMIT ← all or nothing: an aborted settlement queues nothing         │
//! └─────────────────────────────────────────────────────────────────────────┘
//!          │
//!          ▼
//!   consumer: get_pending → do the work → mark_processed / mark_failed
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;

/// One queued hand-off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxEntry {
    pub id: String,
    /// "ORDER", "REDEMPTION", ...
    pub entity_type: String,
    pub entity_id: String,
    /// JSON of the entity as committed.
    pub payload: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

pub(crate) async fn queue(
    conn: &mut SqliteConnection,
    entity_type: &str,
    entity_id: &str,
    payload: &str,
    now: DateTime<Utc>,
) -> DbResult<OutboxEntry> {
    debug!(entity_type = %entity_type, entity_id = %entity_id, "Queuing outbox entry");

    let entry = OutboxEntry {
        id: Uuid::new_v4().to_string(),
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        payload: payload.to_string(),
        attempts: 0,
        last_error: None,
        created_at: now,
        processed_at: None,
    };

    sqlx::query(
        r#"
        INSERT INTO outbox (id, entity_type, entity_id, payload, attempts, last_error, created_at, processed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.entity_type)
    .bind(&entry.entity_id)
    .bind(&entry.payload)
    .bind(entry.attempts)
    .bind(&entry.last_error)
    .bind(entry.created_at)
    .bind(entry.processed_at)
    .execute(conn)
    .await?;

    Ok(entry)
}

/// Repository for the outbox queue.
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: SqlitePool,
}

impl OutboxRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OutboxRepository { pool }
    }

    /// Queues an entry outside any settlement.
    pub async fn queue(
        &self,
        entity_type: &str,
        entity_id: &str,
        payload: &str,
    ) -> DbResult<OutboxEntry> {
        queue(
            &mut *self.pool.acquire().await?,
            entity_type,
            entity_id,
            payload,
            Utc::now(),
        )
        .await
    }

    /// Unprocessed entries, oldest first.
    pub async fn get_pending(&self, limit: u32) -> DbResult<Vec<OutboxEntry>> {
        let entries = sqlx::query_as::<_, OutboxEntry>(
            r#"
            SELECT id, entity_type, entity_id, payload, attempts, last_error, created_at, processed_at
            FROM outbox
            WHERE processed_at IS NULL
            ORDER BY created_at ASC, id
            LIMIT ?1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    pub async fn mark_processed(&self, id: &str) -> DbResult<()> {
        sqlx::query("UPDATE outbox SET processed_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Records a failed hand-off; the entry stays pending.
    pub async fn mark_failed(&self, id: &str, error: &str) -> DbResult<()> {
        sqlx::query("UPDATE outbox SET attempts = attempts + 1, last_error = ?2 WHERE id = ?1")
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox WHERE processed_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
