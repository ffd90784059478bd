//! In-memory audit sink for hermetic tests and embedded callers.

use super::{AuditEntry, AuditSink, NewAuditEntry};
use crate::error::GatewayError;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn entries_for_operation(&self, operation: &str) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.operation == operation)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, entry: &NewAuditEntry) -> Result<Uuid, GatewayError> {
        let audit_id = Uuid::new_v4();
        self.entries.lock().unwrap().push(AuditEntry {
            audit_id,
            model_name: entry.model_name.clone(),
            object_id: entry.object_id.clone(),
            operation: entry.operation.clone(),
            actor: entry.actor.clone(),
            before_state: entry.before_state.clone(),
            after_state: entry.after_state.clone(),
            source_service: entry.source_service.clone(),
            duration_seconds: entry.duration_seconds,
            context: entry.context.clone(),
            recorded_utc: Utc::now(),
        });
        Ok(audit_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::Auditor;
    use std::sync::Arc;

    #[tokio::test]
    async fn appended_entries_are_retrievable_and_never_mutated() {
        let sink = Arc::new(MemoryAuditSink::new());
        let auditor = Auditor::new(sink.clone());

        auditor
            .record(
                NewAuditEntry::new("Payroll", Uuid::new_v4(), "PAYROLL_CREATE", "tester")
                    .from_service("payroll-gateway")
                    .with_after(serde_json::json!({ "status": "calculated" })),
            )
            .await;
        auditor
            .record(NewAuditEntry::new(
                "Payroll",
                Uuid::new_v4(),
                "PAYROLL_CREATE_FAILED",
                "tester",
            ))
            .await;

        assert_eq!(sink.entries().len(), 2);
        assert_eq!(sink.entries_for_operation("PAYROLL_CREATE").len(), 1);
        assert_eq!(
            sink.entries_for_operation("PAYROLL_CREATE")[0]
                .after_state
                .as_ref()
                .unwrap()["status"],
            "calculated"
        );
    }
}
