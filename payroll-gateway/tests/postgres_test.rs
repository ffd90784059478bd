//! Postgres-backed integration tests.
//!
//! Run with TEST_DATABASE_URL pointing at a disposable database:
//! `TEST_DATABASE_URL=postgres://... cargo test -p payroll-gateway -- --ignored`

use chrono::{NaiveDate, Utc};
use gateway_core::audit::postgres::PostgresAuditSink;
use gateway_core::audit::Auditor;
use gateway_core::authority::{services, AuthorityTable};
use gateway_core::config::DatabaseConfig;
use gateway_core::idempotency::postgres::PostgresIdempotencyStore;
use ledger_gateway::services::LedgerEngine;
use ledger_gateway::store::postgres::PostgresLedgerStore;
use payroll_gateway::models::{Contract, Employee, SalaryComponent};
use payroll_gateway::services::{CreatePayroll, PayrollGateway};
use payroll_gateway::store::postgres::PostgresPayrollStore;
use payroll_gateway::store::PayrollStore;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

async fn spawn_gateway() -> (PayrollGateway, Arc<PostgresPayrollStore>) {
    let url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set for Postgres integration tests");
    let pool = gateway_core::db::connect(&DatabaseConfig {
        url,
        max_connections: 4,
        min_connections: 1,
    })
    .await
    .expect("Failed to connect");

    gateway_core::db::run_migrations(&pool)
        .await
        .expect("Failed to run core migrations");
    let ledger_store = PostgresLedgerStore::new(pool.clone());
    ledger_store
        .run_migrations()
        .await
        .expect("Failed to run ledger migrations");
    let store = Arc::new(PostgresPayrollStore::new(pool.clone()));
    store
        .run_migrations()
        .await
        .expect("Failed to run payroll migrations");

    let authority = Arc::new(AuthorityTable::defaults());
    let auditor = Auditor::new(Arc::new(PostgresAuditSink::new(pool.clone())));
    let ledger = Arc::new(LedgerEngine::new(
        Arc::new(ledger_store),
        Arc::new(PostgresIdempotencyStore::new(pool.clone())),
        authority.clone(),
        auditor.clone(),
    ));
    let gateway = PayrollGateway::new(
        store.clone(),
        ledger,
        Arc::new(PostgresIdempotencyStore::new(pool)),
        authority,
        auditor,
    );
    (gateway, store)
}

#[tokio::test]
#[ignore]
async fn payroll_create_and_replay_share_one_row() {
    let (gateway, store) = spawn_gateway().await;

    let employee_id = Uuid::new_v4();
    store
        .insert_employee(&Employee {
            employee_id,
            staff_code: format!("IT-{}", &employee_id.simple().to_string()[..8]),
            full_name: "Integration Employee".to_string(),
            active: true,
            created_utc: Utc::now(),
        })
        .await
        .unwrap();
    store
        .insert_contract(&Contract {
            contract_id: Uuid::new_v4(),
            employee_id,
            basic_salary: Decimal::from(5000),
            start_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            end_date: None,
            active: true,
        })
        .await
        .unwrap();
    store
        .insert_component(&SalaryComponent {
            component_id: Uuid::new_v4(),
            code: "BASIC_SALARY".to_string(),
            name: "Basic salary".to_string(),
            kind: "earning".to_string(),
            method: "fixed".to_string(),
            amount: Decimal::from(5000),
            effective_from: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            effective_to: None,
            active: true,
        })
        .await
        .unwrap();

    let key = format!("PAYROLL:{}:2024-01:create", employee_id);
    let request = CreatePayroll {
        caller: services::HR_PORTAL.to_string(),
        employee_id,
        month: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        idempotency_key: key,
        actor: "integration".to_string(),
        contract_id: None,
        payment_method: "bank".to_string(),
        workflow: "monthly".to_string(),
        post_to_ledger: false,
    };

    let first = gateway.create_payroll(request.clone()).await.unwrap();
    let replay = gateway.create_payroll(request).await.unwrap();
    assert_eq!(first.payroll_id, replay.payroll_id);
    assert_eq!(first.net, Decimal::from(5000));
}
