//! Cross-crate workflow test infrastructure.
//!
//! Wires the payroll orchestrator, ledger engine, idempotency store and
//! audit trail together on the in-memory backends so complete business
//! workflows (payroll run -> ledger posting -> payment settlement) are
//! exercised hermetically.

use chrono::{NaiveDate, Utc};
use gateway_core::audit::memory::MemoryAuditSink;
use gateway_core::audit::Auditor;
use gateway_core::authority::AuthorityTable;
use gateway_core::idempotency::memory::MemoryIdempotencyStore;
use gateway_core::lock::LockRegistry;
use ledger_gateway::models::{AccountType, NewAccount};
use ledger_gateway::services::LedgerEngine;
use ledger_gateway::store::memory::MemoryLedgerStore;
use ledger_gateway::store::LedgerStore;
use payroll_gateway::models::{Advance, AdvanceStatus, Contract, Employee, SalaryComponent};
use payroll_gateway::services::{PayrollAccounts, PayrollGateway};
use payroll_gateway::store::memory::MemoryPayrollStore;
use payroll_gateway::store::PayrollStore;
use rust_decimal::Decimal;
use std::sync::{Arc, Once};
use std::time::Duration;
use uuid::Uuid;

pub use gateway_core::authority::services;
pub use payroll_gateway::services::{ApprovePayroll, CancelPayroll, CreatePayroll, ProcessPayment};

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,payroll_gateway=debug,ledger_gateway=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// The cash account seeded for settlements.
pub const CASH_ACCOUNT: &str = "1010";

pub struct Harness {
    pub gateway: Arc<PayrollGateway>,
    pub ledger: Arc<LedgerEngine>,
    pub payroll_store: Arc<MemoryPayrollStore>,
    pub ledger_store: Arc<MemoryLedgerStore>,
    pub idempotency: Arc<MemoryIdempotencyStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub accounts: PayrollAccounts,
}

impl Harness {
    /// Wire every component on memory backends and seed the default
    /// chart of accounts.
    pub async fn spawn() -> Self {
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
        let payroll_store = Arc::new(MemoryPayrollStore::new(
            Arc::new(LockRegistry::new()),
            idempotency.clone(),
            Duration::from_millis(500),
        ));
        let gateway = Arc::new(PayrollGateway::new(
            payroll_store.clone(),
            ledger.clone(),
            idempotency.clone(),
            authority,
            auditor,
        ));

        let accounts = PayrollAccounts::default();
        let harness = Self {
            gateway,
            ledger,
            payroll_store,
            ledger_store,
            idempotency,
            audit,
            accounts,
        };
        harness.seed_chart().await;
        harness
    }

    async fn seed_chart(&self) {
        let seeds = [
            (self.accounts.basic_expense.clone(), AccountType::Expense),
            (self.accounts.allowance_expense.clone(), AccountType::Expense),
            (self.accounts.overtime_expense.clone(), AccountType::Expense),
            (self.accounts.bonus_expense.clone(), AccountType::Expense),
            (self.accounts.insurance_payable.clone(), AccountType::Liability),
            (self.accounts.tax_payable.clone(), AccountType::Liability),
            (
                self.accounts.other_deductions_payable.clone(),
                AccountType::Liability,
            ),
            (self.accounts.advance_receivable.clone(), AccountType::Asset),
            (self.accounts.salaries_payable.clone(), AccountType::Liability),
            (self.accounts.employee_receivable.clone(), AccountType::Asset),
            (CASH_ACCOUNT.to_string(), AccountType::Asset),
        ];
        for (code, account_type) in seeds {
            self.ledger_store
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

    pub async fn seed_employee_with_contract(&self, basic: i64) -> Uuid {
        let employee_id = Uuid::new_v4();
        self.payroll_store
            .insert_employee(&Employee {
                employee_id,
                staff_code: format!("E-{}", &employee_id.simple().to_string()[..8]),
                full_name: "Workflow Employee".to_string(),
                active: true,
                created_utc: Utc::now(),
            })
            .await
            .unwrap();
        self.payroll_store
            .insert_contract(&Contract {
                contract_id: Uuid::new_v4(),
                employee_id,
                basic_salary: Decimal::from(basic),
                start_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
                end_date: None,
                active: true,
            })
            .await
            .unwrap();
        employee_id
    }

    pub async fn seed_component(&self, code: &str, kind: &str, method: &str, amount: i64) {
        self.payroll_store
            .insert_component(&SalaryComponent {
                component_id: Uuid::new_v4(),
                code: code.to_string(),
                name: code.to_string(),
                kind: kind.to_string(),
                method: method.to_string(),
                amount: Decimal::from(amount),
                effective_from: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
                effective_to: None,
                active: true,
            })
            .await
            .unwrap();
    }

    /// Basic 5000 + housing 1000 + social insurance 11%.
    pub async fn seed_standard_components(&self) {
        self.seed_component("BASIC_SALARY", "earning", "fixed", 5000).await;
        self.seed_component("HOUSING", "earning", "fixed", 1000).await;
        self.seed_component("SOCIAL_INSURANCE", "deduction", "percentage", 11)
            .await;
    }

    pub async fn seed_paid_advance(
        &self,
        employee_id: Uuid,
        amount: i64,
        installments: i32,
        per_installment: i64,
        start: NaiveDate,
    ) -> Uuid {
        let advance_id = Uuid::new_v4();
        self.payroll_store
            .insert_advance(&Advance {
                advance_id,
                employee_id,
                amount: Decimal::from(amount),
                installment_count: installments,
                installment_amount: Decimal::from(per_installment),
                remaining_amount: Decimal::from(amount),
                paid_installments: 0,
                deduction_start_month: start,
                status: AdvanceStatus::Paid.as_str().to_string(),
                created_utc: Utc::now(),
            })
            .await
            .unwrap();
        advance_id
    }

    pub fn create_request(&self, employee_id: Uuid, month: NaiveDate, key: &str) -> CreatePayroll {
        CreatePayroll {
            caller: services::HR_PORTAL.to_string(),
            employee_id,
            month,
            idempotency_key: key.to_string(),
            actor: "workflow".to_string(),
            contract_id: None,
            payment_method: "bank".to_string(),
            workflow: "monthly".to_string(),
            post_to_ledger: true,
        }
    }
}

pub fn month(year: i32, m: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, m, 1).unwrap()
}
