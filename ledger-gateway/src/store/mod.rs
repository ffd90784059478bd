//! Storage port for the ledger engine.
//!
//! Two backends ship: PostgreSQL (sqlx) and in-memory. Each composite
//! write method is atomic within the backend, and each backend reports
//! its locking capability explicitly.

pub mod memory;
pub mod postgres;

use crate::models::{ChartAccount, JournalEntry, JournalEntryLine, JournalLine, NewAccount};
use async_trait::async_trait;
use chrono::NaiveDate;
use gateway_core::idempotency::Finalize;
use gateway_core::GatewayError;
use rust_decimal::Decimal;
use uuid::Uuid;

pub use gateway_core::lock::StoreCapabilities;

/// Validated entry header, ready to persist. The engine owns validation;
/// the store owns atomicity and numbering.
#[derive(Debug, Clone)]
pub struct NewJournalEntry {
    pub entry_id: Uuid,
    pub source_module: String,
    pub source_model: String,
    pub source_id: String,
    pub entry_type: String,
    pub entry_date: NaiveDate,
    pub description: String,
    pub idempotency_key: String,
    pub reverses_entry_id: Option<Uuid>,
    pub created_by: String,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    fn capabilities(&self) -> StoreCapabilities;

    /// Insert a chart account (unique code). `finalize` completes the
    /// governing idempotency record atomically with the insert.
    async fn create_account(
        &self,
        account: &NewAccount,
        finalize: Option<Finalize>,
    ) -> Result<ChartAccount, GatewayError>;

    async fn account_by_code(&self, code: &str) -> Result<Option<ChartAccount>, GatewayError>;

    /// Persist an entry and its lines as posted + locked in one
    /// transaction, allocating the next gapless entry number for the
    /// entry's period.
    async fn insert_entry(
        &self,
        entry: &NewJournalEntry,
        lines: &[JournalLine],
        finalize: Option<Finalize>,
    ) -> Result<JournalEntry, GatewayError>;

    async fn entry(&self, entry_id: Uuid) -> Result<Option<JournalEntry>, GatewayError>;

    async fn entry_lines(&self, entry_id: Uuid) -> Result<Vec<JournalEntryLine>, GatewayError>;

    /// Signed net (debits - credits) posted to an account across all
    /// entries.
    async fn account_net(&self, code: &str) -> Result<Decimal, GatewayError>;
}
