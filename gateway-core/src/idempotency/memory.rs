//! In-memory idempotency store for hermetic tests and embedded callers.

use super::{Begin, IdempotencyRecord, IdempotencyStatus, IdempotencyStore};
use crate::error::GatewayError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemoryIdempotencyStore {
    records: Mutex<HashMap<(String, String), IdempotencyRecord>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update_status(
        &self,
        record_id: Uuid,
        status: IdempotencyStatus,
        result: Option<serde_json::Value>,
    ) -> Result<(), GatewayError> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .values_mut()
            .find(|r| r.record_id == record_id)
            .ok_or_else(|| {
                GatewayError::NotFound(anyhow::anyhow!("Idempotency record {} not found", record_id))
            })?;
        record.status = status.as_str().to_string();
        if result.is_some() {
            record.result_data = result;
        }
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn begin(
        &self,
        operation_type: &str,
        key: &str,
        actor: &str,
        ttl: Duration,
    ) -> Result<Begin, GatewayError> {
        let now = Utc::now();
        let mut records = self.records.lock().unwrap();
        let map_key = (operation_type.to_string(), key.to_string());

        if let Some(existing) = records.get(&map_key) {
            if !existing.is_expired(now) {
                return Ok(match existing.parsed_status() {
                    Some(IdempotencyStatus::Pending) => Begin::InFlight(existing.clone()),
                    _ => Begin::Replay(existing.clone()),
                });
            }
        }

        let record = IdempotencyRecord {
            record_id: Uuid::new_v4(),
            operation_type: operation_type.to_string(),
            idempotency_key: key.to_string(),
            status: IdempotencyStatus::Pending.as_str().to_string(),
            result_data: None,
            actor: actor.to_string(),
            created_utc: now,
            expires_utc: now + ttl,
        };
        records.insert(map_key, record.clone());
        Ok(Begin::Fresh(record))
    }

    async fn complete(
        &self,
        record_id: Uuid,
        result: serde_json::Value,
    ) -> Result<(), GatewayError> {
        self.update_status(record_id, IdempotencyStatus::Completed, Some(result))
    }

    async fn fail(&self, record_id: Uuid, error: &str) -> Result<(), GatewayError> {
        // Only a pending record can fail; a record completed inside the
        // business transaction stays completed.
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records
            .values_mut()
            .find(|r| r.record_id == record_id)
        {
            if record.parsed_status() == Some(IdempotencyStatus::Pending) {
                record.status = IdempotencyStatus::Failed.as_str().to_string();
                record.result_data = Some(serde_json::json!({ "error": error }));
            }
        }
        Ok(())
    }

    async fn release(&self, record_id: Uuid) -> Result<(), GatewayError> {
        let mut records = self.records.lock().unwrap();
        records.retain(|_, r| {
            !(r.record_id == record_id
                && r.parsed_status() == Some(IdempotencyStatus::Pending))
        });
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, GatewayError> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|_, r| !r.is_expired(now));
        Ok((before - records.len()) as u64)
    }
}
