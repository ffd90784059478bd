//! Postgres-backed integration tests.
//!
//! Run with TEST_DATABASE_URL pointing at a disposable database:
//! `TEST_DATABASE_URL=postgres://... cargo test -p ledger-gateway -- --ignored`

use gateway_core::audit::postgres::PostgresAuditSink;
use gateway_core::audit::Auditor;
use gateway_core::authority::{services, AuthorityTable};
use gateway_core::config::DatabaseConfig;
use gateway_core::idempotency::postgres::PostgresIdempotencyStore;
use gateway_core::GatewayError;
use ledger_gateway::models::{AccountType, JournalLine};
use ledger_gateway::services::{CreateAccountRequest, LedgerEngine, PostJournalEntry};
use ledger_gateway::store::postgres::PostgresLedgerStore;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

async fn spawn_engine() -> LedgerEngine {
    let url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set for Postgres integration tests");
    let pool = gateway_core::db::connect(&DatabaseConfig {
        url,
        max_connections: 2,
        min_connections: 1,
    })
    .await
    .expect("Failed to connect");

    gateway_core::db::run_migrations(&pool)
        .await
        .expect("Failed to run core migrations");
    let store = PostgresLedgerStore::new(pool.clone());
    store.run_migrations().await.expect("Failed to run ledger migrations");

    LedgerEngine::new(
        Arc::new(store),
        Arc::new(PostgresIdempotencyStore::new(pool.clone())),
        Arc::new(AuthorityTable::defaults()),
        Auditor::new(Arc::new(PostgresAuditSink::new(pool))),
    )
}

fn request(code_suffix: &str, lines: Vec<JournalLine>, key: &str) -> PostJournalEntry {
    PostJournalEntry {
        caller: services::FINANCE_PORTAL.to_string(),
        source_module: "sales".to_string(),
        source_model: "Invoice".to_string(),
        source_id: code_suffix.to_string(),
        lines,
        idempotency_key: key.to_string(),
        actor: "tester".to_string(),
        entry_type: "general".to_string(),
        description: "Integration test entry".to_string(),
        entry_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
    }
}

#[tokio::test]
#[ignore]
async fn posting_and_replay_share_one_row() {
    let engine = spawn_engine().await;

    // Unique codes per run: the database persists between runs.
    let run = Uuid::new_v4().simple().to_string();
    let cash = format!("IT-{}-1000", &run[..8]);
    let revenue = format!("IT-{}-4000", &run[..8]);
    for (code, account_type) in [(&cash, AccountType::Asset), (&revenue, AccountType::Revenue)] {
        engine
            .create_account(CreateAccountRequest {
                caller: services::FINANCE_PORTAL.to_string(),
                code: code.to_string(),
                name: code.to_string(),
                account_type,
                idempotency_key: format!("ACCOUNT:{}:create", code),
                actor: "tester".to_string(),
            })
            .await
            .unwrap();
    }

    let key = format!("SALE:{}:2024-01:post", run);
    let lines = vec![
        JournalLine::debit(&cash, Decimal::new(10000, 2)),
        JournalLine::credit(&revenue, Decimal::new(10000, 2)),
    ];

    let first = engine
        .create_journal_entry(request(&run, lines.clone(), &key))
        .await
        .unwrap();
    let second = engine
        .create_journal_entry(request(&run, lines, &key))
        .await
        .unwrap();

    assert_eq!(first.entry_id, second.entry_id);
    assert_eq!(engine.entry_lines(first.entry_id).await.unwrap().len(), 2);
}

#[tokio::test]
#[ignore]
async fn unbalanced_posting_is_rejected() {
    let engine = spawn_engine().await;

    let run = Uuid::new_v4().simple().to_string();
    let cash = format!("IT-{}-1000", &run[..8]);
    engine
        .create_account(CreateAccountRequest {
            caller: services::FINANCE_PORTAL.to_string(),
            code: cash.clone(),
            name: cash.clone(),
            account_type: AccountType::Asset,
            idempotency_key: format!("ACCOUNT:{}:create", cash),
            actor: "tester".to_string(),
        })
        .await
        .unwrap();

    let err = engine
        .create_journal_entry(request(
            &run,
            vec![
                JournalLine::debit(&cash, Decimal::new(800000, 2)),
                JournalLine::credit(&cash, Decimal::new(799999, 2)),
            ],
            &format!("SALE:{}:2024-01:post", run),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::LedgerImbalance { .. }));
}
