//! Append-only audit trail.
//!
//! Every governed mutation records who did what, when, with what
//! before/after state and how long it took. The trail is observability,
//! not a correctness gate: a failed audit write is logged loudly and
//! swallowed so it never rolls back the business transaction it describes.

pub mod memory;
pub mod postgres;

use crate::error::GatewayError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditEntry {
    pub audit_id: Uuid,
    pub model_name: String,
    pub object_id: String,
    pub operation: String,
    pub actor: String,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub source_service: String,
    pub duration_seconds: f64,
    pub context: Option<serde_json::Value>,
    pub recorded_utc: DateTime<Utc>,
}

/// Input for one audit record.
#[derive(Debug, Clone, Default)]
pub struct NewAuditEntry {
    pub model_name: String,
    pub object_id: String,
    pub operation: String,
    pub actor: String,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub source_service: String,
    pub duration_seconds: f64,
    pub context: Option<serde_json::Value>,
}

impl NewAuditEntry {
    pub fn new(model_name: &str, object_id: impl ToString, operation: &str, actor: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            object_id: object_id.to_string(),
            operation: operation.to_string(),
            actor: actor.to_string(),
            ..Default::default()
        }
    }

    pub fn with_after(mut self, after: serde_json::Value) -> Self {
        self.after_state = Some(after);
        self
    }

    pub fn with_before(mut self, before: serde_json::Value) -> Self {
        self.before_state = Some(before);
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn from_service(mut self, source_service: &str) -> Self {
        self.source_service = source_service.to_string();
        self
    }

    pub fn took(mut self, duration_seconds: f64) -> Self {
        self.duration_seconds = duration_seconds;
        self
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &NewAuditEntry) -> Result<Uuid, GatewayError>;
}

/// Best-effort wrapper around a sink.
#[derive(Clone)]
pub struct Auditor {
    sink: Arc<dyn AuditSink>,
}

impl Auditor {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Record an entry; sink failures are logged at error level and do not
    /// propagate.
    pub async fn record(&self, entry: NewAuditEntry) {
        if let Err(e) = self.sink.append(&entry).await {
            error!(
                model = %entry.model_name,
                object_id = %entry.object_id,
                operation = %entry.operation,
                error = %e,
                "Audit write failed; business transaction is unaffected"
            );
        }
    }
}
