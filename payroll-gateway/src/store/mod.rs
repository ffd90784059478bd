//! Storage port for the payroll orchestrator.
//!
//! The composite write methods are atomic within one backend transaction:
//! `insert_payroll` persists the payroll, its lines, the staged advance
//! installments, the advance balance updates and the idempotency
//! completion together, under row locks on the advances. The unique
//! constraints on (employee, month) and (advance, month) are the last
//! line of defense when application logic races.

pub mod memory;
pub mod postgres;

use crate::models::{
    Advance, AdvanceInstallment, ComponentKind, Contract, Employee, Payroll, PayrollLine,
    PayrollStatus, SalaryComponent,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use gateway_core::idempotency::Finalize;
use gateway_core::GatewayError;
use rust_decimal::Decimal;
use uuid::Uuid;

pub use gateway_core::lock::StoreCapabilities;

/// Held row lock on an entity; released on drop. The Postgres backend
/// holds an open `SELECT ... FOR UPDATE` transaction, the memory backend
/// a registry guard.
pub trait EntityLock: Send {}

/// Input line for a payroll.
#[derive(Debug, Clone)]
pub struct NewPayrollLine {
    pub component_code: String,
    pub name: String,
    pub kind: ComponentKind,
    pub amount: Decimal,
}

/// Installment staged during advance coordination, persisted with the
/// payroll.
#[derive(Debug, Clone)]
pub struct StagedInstallment {
    pub advance_id: Uuid,
    pub amount: Decimal,
    pub installment_number: i32,
}

/// Fully-computed payroll ready to persist.
#[derive(Debug, Clone)]
pub struct PayrollDraft {
    pub payroll: Payroll,
    pub lines: Vec<NewPayrollLine>,
    pub installments: Vec<StagedInstallment>,
}

/// Result of a payroll insert: the persisted payroll and the installment
/// rows created with it.
#[derive(Debug, Clone)]
pub struct PayrollCommit {
    pub payroll: Payroll,
    pub installments: Vec<AdvanceInstallment>,
}

/// Status transitions applied under a row lock on the payroll.
#[derive(Debug, Clone)]
pub enum PayrollTransition {
    Approve {
        approved_by: String,
    },
    Pay {
        payment_method: String,
        payment_reference: String,
        settlement_entry_id: Uuid,
    },
    Cancel,
}

impl PayrollTransition {
    pub fn target(&self) -> PayrollStatus {
        match self {
            Self::Approve { .. } => PayrollStatus::Approved,
            Self::Pay { .. } => PayrollStatus::Paid,
            Self::Cancel => PayrollStatus::Cancelled,
        }
    }
}

#[async_trait]
pub trait PayrollStore: Send + Sync {
    fn capabilities(&self) -> StoreCapabilities;

    // Reference data -------------------------------------------------------

    async fn insert_employee(&self, employee: &Employee) -> Result<(), GatewayError>;
    async fn employee(&self, employee_id: Uuid) -> Result<Option<Employee>, GatewayError>;

    async fn insert_contract(&self, contract: &Contract) -> Result<(), GatewayError>;
    async fn contract(&self, contract_id: Uuid) -> Result<Option<Contract>, GatewayError>;
    /// The active contract covering the pay month, if any.
    async fn active_contract_for(
        &self,
        employee_id: Uuid,
        month: NaiveDate,
    ) -> Result<Option<Contract>, GatewayError>;

    async fn insert_component(&self, component: &SalaryComponent) -> Result<(), GatewayError>;
    /// Active components effective for the pay month.
    async fn components_effective(
        &self,
        month: NaiveDate,
    ) -> Result<Vec<SalaryComponent>, GatewayError>;

    // Advances --------------------------------------------------------------

    async fn insert_advance(&self, advance: &Advance) -> Result<(), GatewayError>;
    async fn advance(&self, advance_id: Uuid) -> Result<Option<Advance>, GatewayError>;
    /// Advances of the employee in a deductible status (paid/in_progress)
    /// with an outstanding balance.
    async fn open_advances(&self, employee_id: Uuid) -> Result<Vec<Advance>, GatewayError>;
    async fn installment_exists(
        &self,
        advance_id: Uuid,
        month: NaiveDate,
    ) -> Result<bool, GatewayError>;
    async fn installments_for_advance(
        &self,
        advance_id: Uuid,
    ) -> Result<Vec<AdvanceInstallment>, GatewayError>;

    // Payroll ---------------------------------------------------------------

    /// Exclusive row lock on the employee, held for the duration of the
    /// orchestration so concurrent runs for the same employee serialize.
    async fn lock_employee(&self, employee_id: Uuid) -> Result<Box<dyn EntityLock>, GatewayError>;

    async fn payroll(&self, payroll_id: Uuid) -> Result<Option<Payroll>, GatewayError>;
    async fn payroll_for(
        &self,
        employee_id: Uuid,
        month: NaiveDate,
    ) -> Result<Option<Payroll>, GatewayError>;
    async fn payroll_lines(&self, payroll_id: Uuid) -> Result<Vec<PayrollLine>, GatewayError>;

    /// Atomically persist payroll + lines + installments + advance
    /// updates + idempotency completion. A duplicate (employee, month) is
    /// a hard validation error, never an overwrite.
    async fn insert_payroll(
        &self,
        draft: &PayrollDraft,
        finalize: Option<Finalize>,
    ) -> Result<PayrollCommit, GatewayError>;

    /// Compare-and-set status transition under a row lock on the payroll.
    /// Fails validation when the current status is not `expected`.
    async fn transition_payroll(
        &self,
        payroll_id: Uuid,
        expected: PayrollStatus,
        transition: PayrollTransition,
        finalize: Option<Finalize>,
    ) -> Result<Payroll, GatewayError>;

    /// Link the accrual journal entry posted for a payroll.
    async fn link_journal_entry(
        &self,
        payroll_id: Uuid,
        entry_id: Uuid,
    ) -> Result<(), GatewayError>;
}
