//! PostgreSQL idempotency store.
//!
//! The unique index on (operation_type, idempotency_key) is the last line
//! of defense: the insert-or-fetch below never produces two live records
//! for one key, even when application logic races.

use super::{Begin, IdempotencyRecord, IdempotencyStatus, IdempotencyStore};
use crate::error::GatewayError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPool;
use tracing::instrument;
use uuid::Uuid;

const RECORD_COLUMNS: &str = "record_id, operation_type, idempotency_key, status, result_data, actor, created_utc, expires_utc";

#[derive(Clone)]
pub struct PostgresIdempotencyStore {
    pool: PgPool,
}

impl PostgresIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    #[instrument(skip(self), fields(operation_type = operation_type, key = key))]
    async fn begin(
        &self,
        operation_type: &str,
        key: &str,
        actor: &str,
        ttl: Duration,
    ) -> Result<Begin, GatewayError> {
        let now = Utc::now();

        // Reclaim an expired record for this key, if any.
        let reclaimed = sqlx::query_as::<_, IdempotencyRecord>(&format!(
            r#"
            UPDATE idempotency_records
            SET status = 'pending', result_data = NULL, actor = $3,
                created_utc = $4, expires_utc = $5
            WHERE operation_type = $1 AND idempotency_key = $2 AND expires_utc <= $4
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(operation_type)
        .bind(key)
        .bind(actor)
        .bind(now)
        .bind(now + ttl)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            GatewayError::DatabaseError(anyhow::anyhow!("Failed to reclaim record: {}", e))
        })?;

        if let Some(record) = reclaimed {
            return Ok(Begin::Fresh(record));
        }

        let inserted = sqlx::query_as::<_, IdempotencyRecord>(&format!(
            r#"
            INSERT INTO idempotency_records
                (record_id, operation_type, idempotency_key, status, actor, created_utc, expires_utc)
            VALUES ($1, $2, $3, 'pending', $4, $5, $6)
            ON CONFLICT (operation_type, idempotency_key) DO NOTHING
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(operation_type)
        .bind(key)
        .bind(actor)
        .bind(now)
        .bind(now + ttl)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            GatewayError::DatabaseError(anyhow::anyhow!("Failed to insert record: {}", e))
        })?;

        if let Some(record) = inserted {
            return Ok(Begin::Fresh(record));
        }

        // Another caller owns the key; report its record.
        let existing = sqlx::query_as::<_, IdempotencyRecord>(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM idempotency_records
            WHERE operation_type = $1 AND idempotency_key = $2
            "#
        ))
        .bind(operation_type)
        .bind(key)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            GatewayError::DatabaseError(anyhow::anyhow!("Failed to fetch record: {}", e))
        })?;

        Ok(match existing.parsed_status() {
            Some(IdempotencyStatus::Pending) => Begin::InFlight(existing),
            _ => Begin::Replay(existing),
        })
    }

    #[instrument(skip(self, result))]
    async fn complete(
        &self,
        record_id: Uuid,
        result: serde_json::Value,
    ) -> Result<(), GatewayError> {
        sqlx::query(
            "UPDATE idempotency_records SET status = 'completed', result_data = $2 WHERE record_id = $1",
        )
        .bind(record_id)
        .bind(result)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            GatewayError::DatabaseError(anyhow::anyhow!("Failed to complete record: {}", e))
        })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fail(&self, record_id: Uuid, error: &str) -> Result<(), GatewayError> {
        // Only a pending record can fail; a record completed inside the
        // business transaction stays completed.
        sqlx::query(
            "UPDATE idempotency_records SET status = 'failed', result_data = $2 WHERE record_id = $1 AND status = 'pending'",
        )
        .bind(record_id)
        .bind(serde_json::json!({ "error": error }))
        .execute(&self.pool)
        .await
        .map_err(|e| GatewayError::DatabaseError(anyhow::anyhow!("Failed to fail record: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn release(&self, record_id: Uuid) -> Result<(), GatewayError> {
        sqlx::query("DELETE FROM idempotency_records WHERE record_id = $1 AND status = 'pending'")
            .bind(record_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                GatewayError::DatabaseError(anyhow::anyhow!("Failed to release record: {}", e))
            })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, GatewayError> {
        let result = sqlx::query("DELETE FROM idempotency_records WHERE expires_utc <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                GatewayError::DatabaseError(anyhow::anyhow!("Failed to purge records: {}", e))
            })?;
        Ok(result.rows_affected())
    }
}
