//! Common test utilities for payroll-gateway tests.

use chrono::{NaiveDate, Utc};
use gateway_core::audit::memory::MemoryAuditSink;
use gateway_core::audit::Auditor;
use gateway_core::authority::{services, AuthorityTable};
use gateway_core::idempotency::memory::MemoryIdempotencyStore;
use gateway_core::lock::LockRegistry;
use ledger_gateway::models::{AccountType, NewAccount};
use ledger_gateway::services::LedgerEngine;
use ledger_gateway::store::memory::MemoryLedgerStore;
use payroll_gateway::models::{Advance, AdvanceStatus, Contract, Employee, SalaryComponent};
use payroll_gateway::services::{CreatePayroll, PayrollAccounts, PayrollGateway};
use payroll_gateway::store::memory::MemoryPayrollStore;
use payroll_gateway::store::PayrollStore;
use rust_decimal::Decimal;
use std::sync::{Arc, Once};
use std::time::Duration;
use uuid::Uuid;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,payroll_gateway=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub struct TestGateway {
    pub gateway: Arc<PayrollGateway>,
    pub ledger: Arc<LedgerEngine>,
    pub store: Arc<MemoryPayrollStore>,
    pub ledger_store: Arc<MemoryLedgerStore>,
    pub idempotency: Arc<MemoryIdempotencyStore>,
    pub audit: Arc<MemoryAuditSink>,
}

/// Build a fully wired memory-backed gateway with the default chart of
/// accounts seeded.
pub async fn spawn_gateway() -> TestGateway {
    init_tracing();

    let idempotency = Arc::new(MemoryIdempotencyStore::new());
    let ledger_store = Arc::new(MemoryLedgerStore::new(idempotency.clone()));
    let audit = Arc::new(MemoryAuditSink::new());
    let authority = Arc::new(AuthorityTable::defaults());
    let auditor = Auditor::new(audit.clone());

    let ledger = Arc::new(LedgerEngine::new(
        ledger_store.clone(),
        idempotency.clone(),
        authority.clone(),
        auditor.clone(),
    ));

    let store = Arc::new(MemoryPayrollStore::new(
        Arc::new(LockRegistry::new()),
        idempotency.clone(),
        Duration::from_millis(500),
    ));

    let gateway = Arc::new(PayrollGateway::new(
        store.clone(),
        ledger.clone(),
        idempotency.clone(),
        authority,
        auditor,
    ));

    seed_chart(&ledger_store).await;

    TestGateway {
        gateway,
        ledger,
        store,
        ledger_store,
        idempotency,
        audit,
    }
}

/// Seed the accounts the default payroll mapping touches, plus a cash
/// account for settlements.
async fn seed_chart(store: &MemoryLedgerStore) {
    use ledger_gateway::store::LedgerStore;

    let accounts = PayrollAccounts::default();
    let seeds = [
        (accounts.basic_expense.clone(), AccountType::Expense),
        (accounts.allowance_expense.clone(), AccountType::Expense),
        (accounts.overtime_expense.clone(), AccountType::Expense),
        (accounts.bonus_expense.clone(), AccountType::Expense),
        (accounts.insurance_payable.clone(), AccountType::Liability),
        (accounts.tax_payable.clone(), AccountType::Liability),
        (
            accounts.other_deductions_payable.clone(),
            AccountType::Liability,
        ),
        (accounts.advance_receivable.clone(), AccountType::Asset),
        (accounts.salaries_payable.clone(), AccountType::Liability),
        (accounts.employee_receivable.clone(), AccountType::Asset),
        ("1010".to_string(), AccountType::Asset),
    ];
    for (code, account_type) in seeds {
        store
            .create_account(
                &NewAccount {
                    code: code.clone(),
                    name: code,
                    account_type,
                },
                None,
            )
            .await
            .expect("Failed to seed account");
    }
}

pub fn month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap()
}

pub async fn seed_employee(t: &TestGateway, active: bool) -> Uuid {
    let employee_id = Uuid::new_v4();
    t.store
        .insert_employee(&Employee {
            employee_id,
            staff_code: format!("E-{}", &employee_id.simple().to_string()[..8]),
            full_name: "Test Employee".to_string(),
            active,
            created_utc: Utc::now(),
        })
        .await
        .unwrap();
    employee_id
}

pub async fn seed_contract(t: &TestGateway, employee_id: Uuid, basic: i64) -> Uuid {
    let contract_id = Uuid::new_v4();
    t.store
        .insert_contract(&Contract {
            contract_id,
            employee_id,
            basic_salary: Decimal::from(basic),
            start_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            end_date: None,
            active: true,
        })
        .await
        .unwrap();
    contract_id
}

pub async fn seed_component(
    t: &TestGateway,
    code: &str,
    kind: &str,
    method: &str,
    amount: Decimal,
) {
    t.store
        .insert_component(&SalaryComponent {
            component_id: Uuid::new_v4(),
            code: code.to_string(),
            name: code.to_string(),
            kind: kind.to_string(),
            method: method.to_string(),
            amount,
            effective_from: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            effective_to: None,
            active: true,
        })
        .await
        .unwrap();
}

/// The standard scenario: basic 5000, housing 1000, social insurance 11%.
pub async fn seed_standard_components(t: &TestGateway) {
    seed_component(t, "BASIC_SALARY", "earning", "fixed", Decimal::from(5000)).await;
    seed_component(t, "HOUSING", "earning", "fixed", Decimal::from(1000)).await;
    seed_component(
        t,
        "SOCIAL_INSURANCE",
        "deduction",
        "percentage",
        Decimal::from(11),
    )
    .await;
}

pub async fn seed_advance(
    t: &TestGateway,
    employee_id: Uuid,
    amount: i64,
    installment_count: i32,
    installment_amount: i64,
    start: NaiveDate,
    status: AdvanceStatus,
) -> Uuid {
    let advance_id = Uuid::new_v4();
    t.store
        .insert_advance(&Advance {
            advance_id,
            employee_id,
            amount: Decimal::from(amount),
            installment_count,
            installment_amount: Decimal::from(installment_amount),
            remaining_amount: Decimal::from(amount),
            paid_installments: 0,
            deduction_start_month: start,
            status: status.as_str().to_string(),
            created_utc: Utc::now(),
        })
        .await
        .unwrap();
    advance_id
}

pub fn create_request(employee_id: Uuid, pay_month: NaiveDate, key: &str) -> CreatePayroll {
    CreatePayroll {
        caller: services::HR_PORTAL.to_string(),
        employee_id,
        month: pay_month,
        idempotency_key: key.to_string(),
        actor: "tester".to_string(),
        contract_id: None,
        payment_method: "bank".to_string(),
        workflow: "monthly".to_string(),
        post_to_ledger: false,
    }
}
