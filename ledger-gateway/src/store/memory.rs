//! In-memory ledger store for hermetic tests and embedded callers.

use super::{LedgerStore, NewJournalEntry, StoreCapabilities};
use crate::models::{
    ChartAccount, EntryStatus, JournalEntry, JournalEntryLine, JournalLine, NewAccount, period_of,
};
use async_trait::async_trait;
use chrono::Utc;
use gateway_core::idempotency::{Finalize, IdempotencyStore};
use gateway_core::GatewayError;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<String, ChartAccount>,
    entries: HashMap<Uuid, JournalEntry>,
    lines: Vec<JournalEntryLine>,
    period_counters: HashMap<String, i64>,
}

pub struct MemoryLedgerStore {
    tables: Mutex<Tables>,
    idempotency: Arc<dyn IdempotencyStore>,
}

impl MemoryLedgerStore {
    /// The idempotency store is needed so `finalize` instructions commit
    /// together with the business write, matching the Postgres backend.
    pub fn new(idempotency: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            idempotency,
        }
    }

    /// Number of persisted entries; used by tests asserting exactly-once
    /// writes.
    pub fn entry_count(&self) -> usize {
        self.tables.lock().unwrap().entries.len()
    }

    /// Chart maintenance: mark an account inactive so postings against it
    /// fail closed.
    pub fn deactivate_account(&self, code: &str) {
        if let Some(account) = self.tables.lock().unwrap().accounts.get_mut(code) {
            account.active = false;
        }
    }

    async fn apply_finalize(&self, finalize: Option<Finalize>) -> Result<(), GatewayError> {
        if let Some(finalize) = finalize {
            self.idempotency
                .complete(finalize.record_id, finalize.result)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities { row_locks: true }
    }

    async fn create_account(
        &self,
        account: &NewAccount,
        finalize: Option<Finalize>,
    ) -> Result<ChartAccount, GatewayError> {
        let created = {
            let mut tables = self.tables.lock().unwrap();
            if tables.accounts.contains_key(&account.code) {
                return Err(GatewayError::Conflict(anyhow::anyhow!(
                    "Account with code '{}' already exists",
                    account.code
                )));
            }
            let created = ChartAccount {
                account_id: Uuid::new_v4(),
                code: account.code.clone(),
                name: account.name.clone(),
                account_type: account.account_type.as_str().to_string(),
                active: true,
                created_utc: Utc::now(),
            };
            tables.accounts.insert(account.code.clone(), created.clone());
            created
        };
        self.apply_finalize(finalize).await?;
        Ok(created)
    }

    async fn account_by_code(&self, code: &str) -> Result<Option<ChartAccount>, GatewayError> {
        Ok(self.tables.lock().unwrap().accounts.get(code).cloned())
    }

    async fn insert_entry(
        &self,
        entry: &NewJournalEntry,
        lines: &[JournalLine],
        finalize: Option<Finalize>,
    ) -> Result<JournalEntry, GatewayError> {
        let persisted = {
            let mut tables = self.tables.lock().unwrap();

            // Unique-constraint defense: one live entry per idempotency key.
            if let Some(existing) = tables
                .entries
                .values()
                .find(|e| e.idempotency_key == entry.idempotency_key)
            {
                return Ok(existing.clone());
            }

            let period = period_of(entry.entry_date);
            let next_no = tables
                .period_counters
                .get(&period)
                .copied()
                .unwrap_or(0)
                + 1;
            tables.period_counters.insert(period.clone(), next_no);

            let persisted = JournalEntry {
                entry_id: entry.entry_id,
                entry_no: next_no,
                period,
                source_module: entry.source_module.clone(),
                source_model: entry.source_model.clone(),
                source_id: entry.source_id.clone(),
                entry_type: entry.entry_type.clone(),
                status: EntryStatus::Posted.as_str().to_string(),
                locked: true,
                entry_date: entry.entry_date,
                description: entry.description.clone(),
                idempotency_key: entry.idempotency_key.clone(),
                reverses_entry_id: entry.reverses_entry_id,
                created_by: entry.created_by.clone(),
                created_utc: Utc::now(),
            };
            tables.entries.insert(persisted.entry_id, persisted.clone());
            for (i, line) in lines.iter().enumerate() {
                tables.lines.push(JournalEntryLine {
                    line_id: Uuid::new_v4(),
                    entry_id: persisted.entry_id,
                    line_no: (i + 1) as i32,
                    account_code: line.account_code.clone(),
                    amount: line.amount,
                    direction: line.direction.as_str().to_string(),
                });
            }
            persisted
        };
        self.apply_finalize(finalize).await?;
        Ok(persisted)
    }

    async fn entry(&self, entry_id: Uuid) -> Result<Option<JournalEntry>, GatewayError> {
        Ok(self.tables.lock().unwrap().entries.get(&entry_id).cloned())
    }

    async fn entry_lines(&self, entry_id: Uuid) -> Result<Vec<JournalEntryLine>, GatewayError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .lines
            .iter()
            .filter(|l| l.entry_id == entry_id)
            .cloned()
            .collect())
    }

    async fn account_net(&self, code: &str) -> Result<Decimal, GatewayError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .lines
            .iter()
            .filter(|l| l.account_code == code)
            .map(|l| l.signed_amount())
            .sum())
    }
}
