use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use tessera_core::{CoreError, OutboxStore};
use tessera_domain::{OutboxMessage, OutboxStatus};

use crate::database::db_err;

pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal struct for type-safe querying
#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: Uuid,
    aggregate_type: String,
    aggregate_id: String,
    event_type: String,
    payload: serde_json::Value,
    status: String,
    retry_count: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl OutboxRow {
    fn into_message(self) -> Result<OutboxMessage, CoreError> {
        let status = OutboxStatus::parse(&self.status)
            .ok_or_else(|| CoreError::Storage(format!("unknown outbox status: {}", self.status)))?;
        Ok(OutboxMessage {
            id: self.id,
            aggregate_type: self.aggregate_type,
            aggregate_id: self.aggregate_id,
            event_type: self.event_type,
            payload: self.payload,
            status,
            retry_count: self.retry_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
            processed_at: self.processed_at,
        })
    }
}

/// Append a row inside the caller's transaction. Every state-changing store
/// method routes through here so the row commits with the mutation or not
/// at all.
pub(crate) async fn append(
    tx: &mut Transaction<'_, Postgres>,
    message: &OutboxMessage,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO outbox_messages (id, aggregate_type, aggregate_id, event_type, payload, status, retry_count, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(message.id)
    .bind(&message.aggregate_type)
    .bind(&message.aggregate_id)
    .bind(&message.event_type)
    .bind(&message.payload)
    .bind(message.status.as_str())
    .bind(message.retry_count)
    .bind(message.created_at)
    .bind(message.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(())
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn poll_undelivered(
        &self,
        limit: usize,
        max_retries: i32,
        requeue_after: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>, CoreError> {
        let stale_before = now - requeue_after;

        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, aggregate_type, aggregate_id, event_type, payload, status, retry_count, created_at, updated_at, processed_at
            FROM outbox_messages
            WHERE status = 'CREATED'
               OR (status = 'FAILED' AND retry_count < $1)
               OR (status = 'PROCESSING' AND updated_at < $2)
            ORDER BY created_at ASC
            LIMIT $3
            "#,
        )
        .bind(max_retries)
        .bind(stale_before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(OutboxRow::into_message).collect()
    }

    async fn mark_processing(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), CoreError> {
        let result = sqlx::query("UPDATE outbox_messages SET status = 'PROCESSING', updated_at = $1 WHERE id = $2")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("outbox message", id));
        }
        Ok(())
    }

    async fn mark_processed(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE outbox_messages SET status = 'PROCESSED', processed_at = $1, updated_at = $1 WHERE id = $2",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("outbox message", id));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid) -> Result<i32, CoreError> {
        let retry_count: Option<i32> = sqlx::query_scalar(
            "UPDATE outbox_messages SET status = 'FAILED', retry_count = retry_count + 1, updated_at = NOW() WHERE id = $1 RETURNING retry_count",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        retry_count.ok_or_else(|| CoreError::not_found("outbox message", id))
    }
}
