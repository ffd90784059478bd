//! Idempotency store: exactly-once-effect semantics for governed operations.
//!
//! A record is keyed by (operation_type, idempotency_key). The first caller
//! inserts a `pending` record and runs the operation; replays get the
//! stored result instead of re-executing. Completion is normally written
//! inside the same database transaction as the business write (see
//! [`Finalize`]), so a key can never be consumed without a usable result.

pub mod memory;
pub mod postgres;

use crate::error::GatewayError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Record lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdempotencyStatus {
    Pending,
    Completed,
    Failed,
}

impl IdempotencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Operation types with their retention windows.
pub mod operations {
    use chrono::Duration;

    pub const PAYROLL_CREATE: &str = "payroll.create";
    pub const PAYROLL_APPROVE: &str = "payroll.approve";
    pub const PAYROLL_PAY: &str = "payroll.pay";
    pub const PAYROLL_CANCEL: &str = "payroll.cancel";
    pub const JOURNAL_POST: &str = "journal.post";
    pub const JOURNAL_REVERSE: &str = "journal.reverse";
    pub const ACCOUNT_CREATE: &str = "account.create";

    /// Retention per operation type: one-time account creation keys live
    /// 30 days, everything else 24 hours.
    pub fn ttl(operation_type: &str) -> Duration {
        match operation_type {
            ACCOUNT_CREATE => Duration::hours(720),
            _ => Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub record_id: Uuid,
    pub operation_type: String,
    pub idempotency_key: String,
    pub status: String,
    pub result_data: Option<serde_json::Value>,
    pub actor: String,
    pub created_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn parsed_status(&self) -> Option<IdempotencyStatus> {
        IdempotencyStatus::from_str(&self.status)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_utc
    }

    /// Pull a named id out of the stored result; a stored result without
    /// a usable id is an idempotency error.
    pub fn result_id(&self, field: &str) -> Result<Uuid, GatewayError> {
        self.result_data
            .as_ref()
            .and_then(|data| data.get(field))
            .and_then(|value| value.as_str())
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| {
                GatewayError::Idempotency(anyhow::anyhow!(
                    "Stored result for {} key '{}' has no usable '{}'",
                    self.operation_type,
                    self.idempotency_key,
                    field
                ))
            })
    }
}

/// Outcome of [`IdempotencyStore::begin`].
#[derive(Debug, Clone)]
pub enum Begin {
    /// No live record existed; a `pending` one is now held by this caller.
    Fresh(IdempotencyRecord),
    /// A finished record exists; return its stored result, do not re-execute.
    Replay(IdempotencyRecord),
    /// Another caller holds an unexpired `pending` record.
    InFlight(IdempotencyRecord),
}

/// Instruction for a store backend to mark a record completed inside the
/// same transaction as the business write it governs.
#[derive(Debug, Clone)]
pub struct Finalize {
    pub record_id: Uuid,
    pub result: serde_json::Value,
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomic insert-or-fetch for (operation_type, key). Expired records
    /// are treated as absent and reclaimed.
    async fn begin(
        &self,
        operation_type: &str,
        key: &str,
        actor: &str,
        ttl: Duration,
    ) -> Result<Begin, GatewayError>;

    /// Finalize a pending record with its result. Prefer [`Finalize`]
    /// through the owning store's transaction where one exists.
    async fn complete(
        &self,
        record_id: Uuid,
        result: serde_json::Value,
    ) -> Result<(), GatewayError>;

    /// Record a deterministic business failure; replays surface it until
    /// the record expires.
    async fn fail(&self, record_id: Uuid, error: &str) -> Result<(), GatewayError>;

    /// Drop a pending record after a retryable infrastructure failure so
    /// the same key may run again.
    async fn release(&self, record_id: Uuid) -> Result<(), GatewayError>;

    /// Background sweep; returns the number of purged records.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, GatewayError>;
}

/// Translate a replayed record into the caller-visible outcome: the stored
/// entity id for completed records, the stored error for failed ones.
pub fn replay_result(record: &IdempotencyRecord, id_field: &str) -> Result<Uuid, GatewayError> {
    match record.parsed_status() {
        Some(IdempotencyStatus::Completed) => record.result_id(id_field),
        Some(IdempotencyStatus::Failed) => {
            let stored = record
                .result_data
                .as_ref()
                .and_then(|data| data.get("error"))
                .and_then(|value| value.as_str())
                .unwrap_or("unknown error");
            Err(GatewayError::Idempotency(anyhow::anyhow!(
                "Key '{}' already failed: {}",
                record.idempotency_key,
                stored
            )))
        }
        _ => Err(GatewayError::Idempotency(anyhow::anyhow!(
            "Key '{}' replayed in unexpected status '{}'",
            record.idempotency_key,
            record.status
        ))),
    }
}
