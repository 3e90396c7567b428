//! Postgres-backed outbox.
//!
//! One row per record in `outbox_records`. The envelope is kept as `jsonb`;
//! delivery bookkeeping (status, attempts, next attempt) lives in plain
//! columns. `seq` fixes append order.
//!
//! `append_in` writes a record on a caller-supplied connection so the
//! project store can append inside its own transaction. Same runtime
//! bridging as the other Postgres stores: synchronous trait, queries via
//! `Handle::block_on`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use tokio::runtime::Handle;
use tracing::instrument;
use uuid::Uuid;

use super::store::{OutboxError, OutboxMessage, OutboxRecord, OutboxStatus, OutboxStore};

const RECORD_COLUMNS: &str =
    "message, status, attempts, last_error, next_attempt_at, created_at, delivered_at";

#[derive(Debug, Clone)]
pub struct PostgresOutbox {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresOutbox {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), OutboxError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_records (
                id              UUID PRIMARY KEY,
                seq             BIGSERIAL NOT NULL UNIQUE,
                tenant_id       UUID NOT NULL,
                aggregate_id    UUID NOT NULL,
                event_type      TEXT NOT NULL,
                message         JSONB NOT NULL,
                status          TEXT NOT NULL,
                attempts        INTEGER NOT NULL DEFAULT 0,
                last_error      TEXT,
                next_attempt_at TIMESTAMPTZ NOT NULL,
                created_at      TIMESTAMPTZ NOT NULL,
                delivered_at    TIMESTAMPTZ
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_table", e))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS outbox_records_pending_idx
                ON outbox_records (aggregate_id, seq)
                WHERE status = 'pending'
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_index", e))?;

        Ok(())
    }

    async fn insert(&self, record: &OutboxRecord) -> Result<(), OutboxError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        append_in(&mut conn, record).await
    }

    async fn select_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxRecord>, OutboxError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM outbox_records o
            WHERE o.status = 'pending'
              AND o.next_attempt_at <= $1
              AND NOT EXISTS (
                  SELECT 1 FROM outbox_records w
                  WHERE w.aggregate_id = o.aggregate_id
                    AND w.status = 'pending'
                    AND w.seq < o.seq
                    AND w.next_attempt_at > $1
              )
            ORDER BY o.seq
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_due", e))?;

        rows.iter().map(record_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn set_delivered(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_records
            SET status = 'delivered', delivered_at = $2, last_error = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_delivered", e))?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self, error), err)]
    async fn set_failed(
        &self,
        id: Uuid,
        error: String,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_records
            SET attempts = attempts + 1, last_error = $2, next_attempt_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(next_attempt_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_failed", e))?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id));
        }
        Ok(())
    }

    async fn select_one(&self, id: Uuid) -> Result<Option<OutboxRecord>, OutboxError> {
        let row = sqlx::query(&format!("SELECT {RECORD_COLUMNS} FROM outbox_records WHERE id = $1"))
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn count_pending(&self) -> Result<usize, OutboxError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox_records WHERE status = 'pending'")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("pending_count", e))?;

        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn delete_delivered(&self, before: DateTime<Utc>) -> Result<usize, OutboxError> {
        let result = sqlx::query(
            "DELETE FROM outbox_records WHERE status = 'delivered' AND delivered_at <= $1",
        )
        .bind(before)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("purge_delivered", e))?;

        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }
}

/// Append `record` on `conn`; run inside the caller's transaction to make
/// the append atomic with other writes.
pub(crate) async fn append_in(conn: &mut PgConnection, record: &OutboxRecord) -> Result<(), OutboxError> {
    let message = serde_json::to_value(&record.message)
        .map_err(|e| OutboxError::Serialization(e.to_string()))?;

    let result = sqlx::query(
        r#"
        INSERT INTO outbox_records
            (id, tenant_id, aggregate_id, event_type, message, status, attempts,
             last_error, next_attempt_at, created_at, delivered_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(record.id())
    .bind(*record.message.tenant_id().as_uuid())
    .bind(*record.message.aggregate_id().as_uuid())
    .bind(record.message.event_type())
    .bind(message)
    .bind(status_str(record.status))
    .bind(i32::try_from(record.attempts).unwrap_or(i32::MAX))
    .bind(record.last_error.as_deref())
    .bind(record.next_attempt_at)
    .bind(record.created_at)
    .bind(record.delivered_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("append", e))?;

    if result.rows_affected() == 0 {
        return Err(OutboxError::AlreadyExists(record.id()));
    }
    Ok(())
}

fn status_str(status: OutboxStatus) -> &'static str {
    match status {
        OutboxStatus::Pending => "pending",
        OutboxStatus::Delivered => "delivered",
    }
}

fn record_from_row(row: &PgRow) -> Result<OutboxRecord, OutboxError> {
    let column = |e: sqlx::Error| OutboxError::Storage(format!("failed to read outbox row: {e}"));

    let message: serde_json::Value = row.try_get("message").map_err(column)?;
    let message: OutboxMessage = serde_json::from_value(message)
        .map_err(|e| OutboxError::Serialization(format!("failed to decode outbox message: {e}")))?;
    let status = match row.try_get::<String, _>("status").map_err(column)?.as_str() {
        "pending" => OutboxStatus::Pending,
        "delivered" => OutboxStatus::Delivered,
        other => return Err(OutboxError::Storage(format!("unknown outbox status: {other}"))),
    };
    let attempts: i32 = row.try_get("attempts").map_err(column)?;

    Ok(OutboxRecord {
        message,
        status,
        attempts: u32::try_from(attempts).unwrap_or_default(),
        last_error: row.try_get("last_error").map_err(column)?,
        next_attempt_at: row.try_get("next_attempt_at").map_err(column)?,
        created_at: row.try_get("created_at").map_err(column)?,
        delivered_at: row.try_get("delivered_at").map_err(column)?,
    })
}

impl OutboxStore for PostgresOutbox {
    fn append(&self, record: OutboxRecord) -> Result<(), OutboxError> {
        self.runtime.block_on(self.insert(&record))
    }

    fn fetch_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxRecord>, OutboxError> {
        self.runtime.block_on(self.select_due(now, limit))
    }

    fn mark_delivered(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), OutboxError> {
        self.runtime.block_on(self.set_delivered(id, at))
    }

    fn mark_failed(
        &self,
        id: Uuid,
        error: String,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), OutboxError> {
        self.runtime.block_on(self.set_failed(id, error, next_attempt_at))
    }

    fn get(&self, id: Uuid) -> Result<Option<OutboxRecord>, OutboxError> {
        self.runtime.block_on(self.select_one(id))
    }

    fn pending_count(&self) -> Result<usize, OutboxError> {
        self.runtime.block_on(self.count_pending())
    }

    fn purge_delivered(&self, before: DateTime<Utc>) -> Result<usize, OutboxError> {
        self.runtime.block_on(self.delete_delivered(before))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> OutboxError {
    match err {
        sqlx::Error::Database(db_err) => {
            OutboxError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => OutboxError::Storage(format!("connection pool closed in {operation}")),
        _ => OutboxError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}
