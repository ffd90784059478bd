//! PostgreSQL audit sink.

use super::{AuditSink, NewAuditEntry};
use crate::error::GatewayError;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct PostgresAuditSink {
    pool: PgPool,
}

impl PostgresAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PostgresAuditSink {
    async fn append(&self, entry: &NewAuditEntry) -> Result<Uuid, GatewayError> {
        let audit_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO audit_entries
                (audit_id, model_name, object_id, operation, actor, before_state, after_state,
                 source_service, duration_seconds, context, recorded_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(audit_id)
        .bind(&entry.model_name)
        .bind(&entry.object_id)
        .bind(&entry.operation)
        .bind(&entry.actor)
        .bind(&entry.before_state)
        .bind(&entry.after_state)
        .bind(&entry.source_service)
        .bind(entry.duration_seconds)
        .bind(&entry.context)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            GatewayError::DatabaseError(anyhow::anyhow!("Failed to append audit entry: {}", e))
        })?;
        Ok(audit_id)
    }
}
