//! The ledger engine: validation, idempotency and posting.
//!
//! This is the only writer of journal entries. Every posting is checked
//! for double-entry balance and fail-closed account resolution before any
//! write happens; first execution persists entry and lines atomically,
//! replays return the original entry unchanged.

use crate::models::{
    entry_types, AccountType, ChartAccount, JournalEntry, JournalEntryLine, JournalLine,
    NewAccount,
};
use crate::services::metrics::{ACCOUNTS_CREATED, ERRORS_TOTAL, POSTINGS_TOTAL};
use crate::store::{LedgerStore, NewJournalEntry};
use chrono::NaiveDate;
use gateway_core::audit::{Auditor, NewAuditEntry};
use gateway_core::authority::{capabilities, AuthorityTable};
use gateway_core::idempotency::{operations, replay_result, Begin, Finalize, IdempotencyStore};
use gateway_core::GatewayError;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Audit operation names.
mod audit_ops {
    pub const JOURNAL_POST: &str = "JOURNAL_POST";
    pub const JOURNAL_POST_FAILED: &str = "JOURNAL_POST_FAILED";
    pub const JOURNAL_REVERSE: &str = "JOURNAL_REVERSE";
    pub const JOURNAL_REVERSE_FAILED: &str = "JOURNAL_REVERSE_FAILED";
    pub const ACCOUNT_CREATE: &str = "ACCOUNT_CREATE";
    pub const ACCOUNT_CREATE_FAILED: &str = "ACCOUNT_CREATE_FAILED";
}

/// Request to post a balanced journal entry.
#[derive(Debug, Clone)]
pub struct PostJournalEntry {
    pub caller: String,
    pub source_module: String,
    pub source_model: String,
    pub source_id: String,
    pub lines: Vec<JournalLine>,
    pub idempotency_key: String,
    pub actor: String,
    pub entry_type: String,
    pub description: String,
    pub entry_date: NaiveDate,
}

/// Request to neutralize a posted entry with a reversing entry.
#[derive(Debug, Clone)]
pub struct ReverseEntry {
    pub caller: String,
    pub entry_id: Uuid,
    pub idempotency_key: String,
    pub actor: String,
    pub entry_date: NaiveDate,
    pub description: Option<String>,
}

/// Request to create a chart account.
#[derive(Debug, Clone)]
pub struct CreateAccountRequest {
    pub caller: String,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub idempotency_key: String,
    pub actor: String,
}

pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    idempotency: Arc<dyn IdempotencyStore>,
    authority: Arc<AuthorityTable>,
    auditor: Auditor,
}

impl LedgerEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        idempotency: Arc<dyn IdempotencyStore>,
        authority: Arc<AuthorityTable>,
        auditor: Auditor,
    ) -> Self {
        Self {
            store,
            idempotency,
            authority,
            auditor,
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Post a balanced journal entry, exactly once per idempotency key.
    #[instrument(skip(self, req), fields(source = %req.source_id, key = %req.idempotency_key))]
    pub async fn create_journal_entry(
        &self,
        req: PostJournalEntry,
    ) -> Result<JournalEntry, GatewayError> {
        let started = Instant::now();
        match self.post_inner(&req).await {
            Ok(entry) => Ok(entry),
            Err(err) => {
                ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();
                self.auditor
                    .record(
                        NewAuditEntry::new(
                            "JournalEntry",
                            &req.source_id,
                            audit_ops::JOURNAL_POST_FAILED,
                            &req.actor,
                        )
                        .from_service(&req.caller)
                        .with_context(serde_json::json!({
                            "error": err.to_string(),
                            "idempotency_key": req.idempotency_key,
                            "entry_type": req.entry_type,
                            "source_module": req.source_module,
                        }))
                        .took(started.elapsed().as_secs_f64()),
                    )
                    .await;
                Err(err)
            }
        }
    }

    async fn post_inner(&self, req: &PostJournalEntry) -> Result<JournalEntry, GatewayError> {
        let started = Instant::now();
        self.authority
            .authorize(&req.caller, capabilities::JOURNAL_POST)?;
        self.validate_lines(&req.lines).await?;

        let record = match self
            .idempotency
            .begin(
                operations::JOURNAL_POST,
                &req.idempotency_key,
                &req.actor,
                operations::ttl(operations::JOURNAL_POST),
            )
            .await?
        {
            Begin::Replay(record) => {
                let entry_id = replay_result(&record, "entry_id")?;
                POSTINGS_TOTAL.with_label_values(&["replay"]).inc();
                return self.store.entry(entry_id).await?.ok_or_else(|| {
                    GatewayError::Idempotency(anyhow::anyhow!(
                        "Stored entry {} for key '{}' no longer exists",
                        entry_id,
                        req.idempotency_key
                    ))
                });
            }
            Begin::InFlight(_) => {
                return Err(GatewayError::Concurrency(anyhow::anyhow!(
                    "Posting for key '{}' is still in flight",
                    req.idempotency_key
                )));
            }
            Begin::Fresh(record) => record,
        };

        let entry_id = Uuid::new_v4();
        let new_entry = NewJournalEntry {
            entry_id,
            source_module: req.source_module.clone(),
            source_model: req.source_model.clone(),
            source_id: req.source_id.clone(),
            entry_type: req.entry_type.clone(),
            entry_date: req.entry_date,
            description: req.description.clone(),
            idempotency_key: req.idempotency_key.clone(),
            reverses_entry_id: None,
            created_by: req.actor.clone(),
        };
        let finalize = Finalize {
            record_id: record.record_id,
            result: serde_json::json!({ "entry_id": entry_id.to_string() }),
        };

        match self
            .store
            .insert_entry(&new_entry, &req.lines, Some(finalize))
            .await
        {
            Ok(entry) => {
                POSTINGS_TOTAL.with_label_values(&["ok"]).inc();
                info!(
                    entry_id = %entry.entry_id,
                    entry_no = entry.entry_no,
                    entry_type = %entry.entry_type,
                    "Journal entry posted"
                );
                self.auditor
                    .record(
                        NewAuditEntry::new(
                            "JournalEntry",
                            entry.entry_id,
                            audit_ops::JOURNAL_POST,
                            &req.actor,
                        )
                        .from_service(&req.caller)
                        .with_after(serde_json::to_value(&entry).unwrap_or_default())
                        .took(started.elapsed().as_secs_f64()),
                    )
                    .await;
                Ok(entry)
            }
            Err(err) => {
                self.abandon_record(record.record_id, &err).await;
                Err(err)
            }
        }
    }

    /// Neutralize a posted entry with a new reversing entry (swapped
    /// sides, referencing the original). Posted lines are never mutated.
    #[instrument(skip(self, req), fields(entry_id = %req.entry_id, key = %req.idempotency_key))]
    pub async fn reverse_entry(&self, req: ReverseEntry) -> Result<JournalEntry, GatewayError> {
        let started = Instant::now();
        match self.reverse_inner(&req).await {
            Ok(entry) => Ok(entry),
            Err(err) => {
                ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();
                self.auditor
                    .record(
                        NewAuditEntry::new(
                            "JournalEntry",
                            req.entry_id,
                            audit_ops::JOURNAL_REVERSE_FAILED,
                            &req.actor,
                        )
                        .from_service(&req.caller)
                        .with_context(serde_json::json!({
                            "error": err.to_string(),
                            "idempotency_key": req.idempotency_key,
                        }))
                        .took(started.elapsed().as_secs_f64()),
                    )
                    .await;
                Err(err)
            }
        }
    }

    async fn reverse_inner(&self, req: &ReverseEntry) -> Result<JournalEntry, GatewayError> {
        let started = Instant::now();
        self.authority
            .authorize(&req.caller, capabilities::JOURNAL_REVERSE)?;

        let original = self.store.entry(req.entry_id).await?.ok_or_else(|| {
            GatewayError::NotFound(anyhow::anyhow!("Journal entry {} not found", req.entry_id))
        })?;
        if !original.is_posted() {
            return Err(GatewayError::Validation(anyhow::anyhow!(
                "Journal entry {} is not posted and cannot be reversed",
                req.entry_id
            )));
        }
        let original_lines = self.store.entry_lines(req.entry_id).await?;

        let record = match self
            .idempotency
            .begin(
                operations::JOURNAL_REVERSE,
                &req.idempotency_key,
                &req.actor,
                operations::ttl(operations::JOURNAL_REVERSE),
            )
            .await?
        {
            Begin::Replay(record) => {
                let entry_id = replay_result(&record, "entry_id")?;
                return self.store.entry(entry_id).await?.ok_or_else(|| {
                    GatewayError::Idempotency(anyhow::anyhow!(
                        "Stored reversal {} for key '{}' no longer exists",
                        entry_id,
                        req.idempotency_key
                    ))
                });
            }
            Begin::InFlight(_) => {
                return Err(GatewayError::Concurrency(anyhow::anyhow!(
                    "Reversal for key '{}' is still in flight",
                    req.idempotency_key
                )));
            }
            Begin::Fresh(record) => record,
        };

        let swapped: Vec<JournalLine> = original_lines
            .iter()
            .filter_map(|line| {
                line.parsed_direction().map(|direction| JournalLine {
                    account_code: line.account_code.clone(),
                    amount: line.amount,
                    direction: direction.swapped(),
                })
            })
            .collect();

        let entry_id = Uuid::new_v4();
        let new_entry = NewJournalEntry {
            entry_id,
            source_module: original.source_module.clone(),
            source_model: original.source_model.clone(),
            source_id: original.source_id.clone(),
            entry_type: entry_types::REVERSAL.to_string(),
            entry_date: req.entry_date,
            description: req.description.clone().unwrap_or_else(|| {
                format!("Reversal of entry {}/{}", original.period, original.entry_no)
            }),
            idempotency_key: req.idempotency_key.clone(),
            reverses_entry_id: Some(original.entry_id),
            created_by: req.actor.clone(),
        };
        let finalize = Finalize {
            record_id: record.record_id,
            result: serde_json::json!({ "entry_id": entry_id.to_string() }),
        };

        match self.store.insert_entry(&new_entry, &swapped, Some(finalize)).await {
            Ok(entry) => {
                POSTINGS_TOTAL.with_label_values(&["ok"]).inc();
                self.auditor
                    .record(
                        NewAuditEntry::new(
                            "JournalEntry",
                            entry.entry_id,
                            audit_ops::JOURNAL_REVERSE,
                            &req.actor,
                        )
                        .from_service(&req.caller)
                        .with_before(serde_json::to_value(&original).unwrap_or_default())
                        .with_after(serde_json::to_value(&entry).unwrap_or_default())
                        .took(started.elapsed().as_secs_f64()),
                    )
                    .await;
                Ok(entry)
            }
            Err(err) => {
                self.abandon_record(record.record_id, &err).await;
                Err(err)
            }
        }
    }

    /// Create a chart account, idempotently.
    #[instrument(skip(self, req), fields(code = %req.code))]
    pub async fn create_account(
        &self,
        req: CreateAccountRequest,
    ) -> Result<ChartAccount, GatewayError> {
        let started = Instant::now();
        match self.create_account_inner(&req).await {
            Ok(account) => Ok(account),
            Err(err) => {
                ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();
                self.auditor
                    .record(
                        NewAuditEntry::new(
                            "ChartAccount",
                            &req.code,
                            audit_ops::ACCOUNT_CREATE_FAILED,
                            &req.actor,
                        )
                        .from_service(&req.caller)
                        .with_context(serde_json::json!({ "error": err.to_string() }))
                        .took(started.elapsed().as_secs_f64()),
                    )
                    .await;
                Err(err)
            }
        }
    }

    async fn create_account_inner(
        &self,
        req: &CreateAccountRequest,
    ) -> Result<ChartAccount, GatewayError> {
        let started = Instant::now();
        self.authority
            .authorize(&req.caller, capabilities::ACCOUNT_CREATE)?;
        if req.code.trim().is_empty() {
            return Err(GatewayError::Validation(anyhow::anyhow!(
                "Account code must not be empty"
            )));
        }

        let record = match self
            .idempotency
            .begin(
                operations::ACCOUNT_CREATE,
                &req.idempotency_key,
                &req.actor,
                operations::ttl(operations::ACCOUNT_CREATE),
            )
            .await?
        {
            Begin::Replay(record) => {
                let code = record
                    .result_data
                    .as_ref()
                    .and_then(|data| data.get("code"))
                    .and_then(|value| value.as_str())
                    .ok_or_else(|| {
                        GatewayError::Idempotency(anyhow::anyhow!(
                            "Stored result for key '{}' has no usable 'code'",
                            req.idempotency_key
                        ))
                    })?;
                return self.store.account_by_code(code).await?.ok_or_else(|| {
                    GatewayError::Idempotency(anyhow::anyhow!(
                        "Stored account '{}' for key '{}' no longer exists",
                        code,
                        req.idempotency_key
                    ))
                });
            }
            Begin::InFlight(_) => {
                return Err(GatewayError::Concurrency(anyhow::anyhow!(
                    "Account creation for key '{}' is still in flight",
                    req.idempotency_key
                )));
            }
            Begin::Fresh(record) => record,
        };

        let new_account = NewAccount {
            code: req.code.clone(),
            name: req.name.clone(),
            account_type: req.account_type,
        };
        let finalize = Finalize {
            record_id: record.record_id,
            result: serde_json::json!({ "code": req.code }),
        };

        match self.store.create_account(&new_account, Some(finalize)).await {
            Ok(account) => {
                ACCOUNTS_CREATED
                    .with_label_values(&[account.account_type.as_str()])
                    .inc();
                self.auditor
                    .record(
                        NewAuditEntry::new(
                            "ChartAccount",
                            &account.code,
                            audit_ops::ACCOUNT_CREATE,
                            &req.actor,
                        )
                        .from_service(&req.caller)
                        .with_after(serde_json::to_value(&account).unwrap_or_default())
                        .took(started.elapsed().as_secs_f64()),
                    )
                    .await;
                Ok(account)
            }
            Err(err) => {
                self.abandon_record(record.record_id, &err).await;
                Err(err)
            }
        }
    }

    /// Resolve an account code, failing closed when it is missing or
    /// inactive.
    pub async fn resolve_active_account(&self, code: &str) -> Result<ChartAccount, GatewayError> {
        let account = self.store.account_by_code(code).await?.ok_or_else(|| {
            GatewayError::Validation(anyhow::anyhow!("Unknown account code '{}'", code))
        })?;
        if !account.active {
            return Err(GatewayError::Validation(anyhow::anyhow!(
                "Account '{}' is inactive",
                code
            )));
        }
        Ok(account)
    }

    pub async fn entry(&self, entry_id: Uuid) -> Result<Option<JournalEntry>, GatewayError> {
        self.store.entry(entry_id).await
    }

    pub async fn entry_lines(&self, entry_id: Uuid) -> Result<Vec<JournalEntryLine>, GatewayError> {
        self.store.entry_lines(entry_id).await
    }

    pub async fn account_net(&self, code: &str) -> Result<Decimal, GatewayError> {
        self.store.account_net(code).await
    }

    async fn validate_lines(&self, lines: &[JournalLine]) -> Result<(), GatewayError> {
        if lines.is_empty() {
            return Err(GatewayError::Validation(anyhow::anyhow!(
                "Journal entry must have at least one line"
            )));
        }

        let mut debits = Decimal::ZERO;
        let mut credits = Decimal::ZERO;

        for line in lines {
            if line.amount <= Decimal::ZERO {
                return Err(GatewayError::Validation(anyhow::anyhow!(
                    "Line amount must be positive for account '{}'",
                    line.account_code
                )));
            }
            self.resolve_active_account(&line.account_code).await?;
            match line.direction {
                crate::models::Direction::Debit => debits += line.amount,
                crate::models::Direction::Credit => credits += line.amount,
            }
        }

        if debits != credits {
            warn!(%debits, %credits, "Rejecting unbalanced journal entry");
            return Err(GatewayError::LedgerImbalance { debits, credits });
        }

        Ok(())
    }

    /// Clean up a fresh idempotency record after a failed execution:
    /// retryable infrastructure failures free the key, deterministic
    /// failures burn it with the stored error.
    async fn abandon_record(&self, record_id: Uuid, err: &GatewayError) {
        let outcome = if err.is_retryable() || matches!(err, GatewayError::DatabaseError(_)) {
            self.idempotency.release(record_id).await
        } else {
            self.idempotency.fail(record_id, &err.to_string()).await
        };
        if let Err(cleanup_err) = outcome {
            warn!(record_id = %record_id, error = %cleanup_err, "Failed to clean up idempotency record");
        }
    }
}
