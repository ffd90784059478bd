//! Common test utilities for ledger-gateway tests.

use gateway_core::audit::memory::MemoryAuditSink;
use gateway_core::audit::Auditor;
use gateway_core::authority::{services, AuthorityTable};
use gateway_core::idempotency::memory::MemoryIdempotencyStore;
use ledger_gateway::models::{AccountType, JournalLine};
use ledger_gateway::services::{CreateAccountRequest, LedgerEngine, PostJournalEntry};
use ledger_gateway::store::memory::MemoryLedgerStore;
use chrono::NaiveDate;
use std::sync::{Arc, Once};
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,ledger_gateway=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub struct TestLedger {
    pub engine: LedgerEngine,
    pub store: Arc<MemoryLedgerStore>,
    pub idempotency: Arc<MemoryIdempotencyStore>,
    pub audit: Arc<MemoryAuditSink>,
}

/// Build a memory-backed engine with the default authority table.
pub fn spawn_engine() -> TestLedger {
    init_tracing();

    let idempotency = Arc::new(MemoryIdempotencyStore::new());
    let store = Arc::new(MemoryLedgerStore::new(idempotency.clone()));
    let audit = Arc::new(MemoryAuditSink::new());
    let engine = LedgerEngine::new(
        store.clone(),
        idempotency.clone(),
        Arc::new(AuthorityTable::defaults()),
        Auditor::new(audit.clone()),
    );

    TestLedger {
        engine,
        store,
        idempotency,
        audit,
    }
}

/// Seed a small chart of accounts: cash (asset) and revenue.
pub async fn seed_accounts(ledger: &TestLedger) {
    for (code, name, account_type) in [
        ("1000", "Cash", AccountType::Asset),
        ("4000", "Revenue", AccountType::Revenue),
    ] {
        ledger
            .engine
            .create_account(CreateAccountRequest {
                caller: services::FINANCE_PORTAL.to_string(),
                code: code.to_string(),
                name: name.to_string(),
                account_type,
                idempotency_key: format!("ACCOUNT:{}:create:{}", code, Uuid::new_v4()),
                actor: "tester".to_string(),
            })
            .await
            .expect("Failed to seed account");
    }
}

pub fn entry_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
}

/// A simple two-line posting request: debit cash, credit revenue.
pub fn post_request(lines: Vec<JournalLine>, idempotency_key: &str) -> PostJournalEntry {
    PostJournalEntry {
        caller: services::FINANCE_PORTAL.to_string(),
        source_module: "sales".to_string(),
        source_model: "Invoice".to_string(),
        source_id: Uuid::new_v4().to_string(),
        lines,
        idempotency_key: idempotency_key.to_string(),
        actor: "tester".to_string(),
        entry_type: "general".to_string(),
        description: "Test entry".to_string(),
        entry_date: entry_date(),
    }
}
