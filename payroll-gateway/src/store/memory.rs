//! In-memory payroll store for hermetic tests and embedded callers.

use super::{
    EntityLock, PayrollCommit, PayrollDraft, PayrollStore, PayrollTransition, StoreCapabilities,
};
use crate::models::{
    Advance, AdvanceInstallment, AdvanceStatus, Contract, Employee, Payroll, PayrollLine,
    PayrollStatus, SalaryComponent,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use gateway_core::idempotency::{Finalize, IdempotencyStore};
use gateway_core::lock::{LockGuard, LockRegistry};
use gateway_core::GatewayError;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

struct MemEntityLock {
    _guard: LockGuard,
}

impl EntityLock for MemEntityLock {}

#[derive(Debug, Default)]
struct Tables {
    employees: HashMap<Uuid, Employee>,
    contracts: HashMap<Uuid, Contract>,
    components: Vec<SalaryComponent>,
    advances: HashMap<Uuid, Advance>,
    installments: Vec<AdvanceInstallment>,
    payrolls: HashMap<Uuid, Payroll>,
    lines: Vec<PayrollLine>,
}

pub struct MemoryPayrollStore {
    tables: Mutex<Tables>,
    locks: Arc<LockRegistry>,
    idempotency: Arc<dyn IdempotencyStore>,
    lock_timeout: Duration,
}

impl MemoryPayrollStore {
    pub fn new(
        locks: Arc<LockRegistry>,
        idempotency: Arc<dyn IdempotencyStore>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            locks,
            idempotency,
            lock_timeout,
        }
    }

    /// Number of persisted payrolls; used by tests asserting exactly-once
    /// writes.
    pub fn payroll_count(&self) -> usize {
        self.tables.lock().unwrap().payrolls.len()
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
impl PayrollStore for MemoryPayrollStore {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities { row_locks: true }
    }

    async fn insert_employee(&self, employee: &Employee) -> Result<(), GatewayError> {
        self.tables
            .lock()
            .unwrap()
            .employees
            .insert(employee.employee_id, employee.clone());
        Ok(())
    }

    async fn employee(&self, employee_id: Uuid) -> Result<Option<Employee>, GatewayError> {
        Ok(self.tables.lock().unwrap().employees.get(&employee_id).cloned())
    }

    async fn insert_contract(&self, contract: &Contract) -> Result<(), GatewayError> {
        self.tables
            .lock()
            .unwrap()
            .contracts
            .insert(contract.contract_id, contract.clone());
        Ok(())
    }

    async fn contract(&self, contract_id: Uuid) -> Result<Option<Contract>, GatewayError> {
        Ok(self.tables.lock().unwrap().contracts.get(&contract_id).cloned())
    }

    async fn active_contract_for(
        &self,
        employee_id: Uuid,
        month: NaiveDate,
    ) -> Result<Option<Contract>, GatewayError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .contracts
            .values()
            .find(|c| c.employee_id == employee_id && c.active && c.covers(month))
            .cloned())
    }

    async fn insert_component(&self, component: &SalaryComponent) -> Result<(), GatewayError> {
        self.tables.lock().unwrap().components.push(component.clone());
        Ok(())
    }

    async fn components_effective(
        &self,
        month: NaiveDate,
    ) -> Result<Vec<SalaryComponent>, GatewayError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .components
            .iter()
            .filter(|c| c.effective_for(month))
            .cloned()
            .collect())
    }

    async fn insert_advance(&self, advance: &Advance) -> Result<(), GatewayError> {
        self.tables
            .lock()
            .unwrap()
            .advances
            .insert(advance.advance_id, advance.clone());
        Ok(())
    }

    async fn advance(&self, advance_id: Uuid) -> Result<Option<Advance>, GatewayError> {
        Ok(self.tables.lock().unwrap().advances.get(&advance_id).cloned())
    }

    async fn open_advances(&self, employee_id: Uuid) -> Result<Vec<Advance>, GatewayError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .advances
            .values()
            .filter(|a| {
                a.employee_id == employee_id
                    && matches!(
                        a.parsed_status(),
                        Some(AdvanceStatus::Paid) | Some(AdvanceStatus::InProgress)
                    )
                    && a.remaining_amount > Decimal::ZERO
            })
            .cloned()
            .collect())
    }

    async fn installment_exists(
        &self,
        advance_id: Uuid,
        month: NaiveDate,
    ) -> Result<bool, GatewayError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .installments
            .iter()
            .any(|i| i.advance_id == advance_id && i.month == month))
    }

    async fn installments_for_advance(
        &self,
        advance_id: Uuid,
    ) -> Result<Vec<AdvanceInstallment>, GatewayError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .installments
            .iter()
            .filter(|i| i.advance_id == advance_id)
            .cloned()
            .collect())
    }

    async fn lock_employee(&self, employee_id: Uuid) -> Result<Box<dyn EntityLock>, GatewayError> {
        let guard = self
            .locks
            .acquire("employee", employee_id, self.lock_timeout)
            .await?;
        Ok(Box::new(MemEntityLock { _guard: guard }))
    }

    async fn payroll(&self, payroll_id: Uuid) -> Result<Option<Payroll>, GatewayError> {
        Ok(self.tables.lock().unwrap().payrolls.get(&payroll_id).cloned())
    }

    async fn payroll_for(
        &self,
        employee_id: Uuid,
        month: NaiveDate,
    ) -> Result<Option<Payroll>, GatewayError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .payrolls
            .values()
            .find(|p| p.employee_id == employee_id && p.month == month)
            .cloned())
    }

    async fn payroll_lines(&self, payroll_id: Uuid) -> Result<Vec<PayrollLine>, GatewayError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .lines
            .iter()
            .filter(|l| l.payroll_id == payroll_id)
            .cloned()
            .collect())
    }

    async fn insert_payroll(
        &self,
        draft: &PayrollDraft,
        finalize: Option<Finalize>,
    ) -> Result<PayrollCommit, GatewayError> {
        let commit = {
            let mut tables = self.tables.lock().unwrap();
            let payroll = &draft.payroll;

            // Unique-constraint defense on (employee, month).
            if tables
                .payrolls
                .values()
                .any(|p| p.employee_id == payroll.employee_id && p.month == payroll.month)
            {
                return Err(GatewayError::Validation(anyhow::anyhow!(
                    "Payroll already exists for employee {} and month {}",
                    payroll.employee_id,
                    payroll.month
                )));
            }

            tables.payrolls.insert(payroll.payroll_id, payroll.clone());
            for line in &draft.lines {
                tables.lines.push(PayrollLine {
                    line_id: Uuid::new_v4(),
                    payroll_id: payroll.payroll_id,
                    component_code: line.component_code.clone(),
                    name: line.name.clone(),
                    kind: line.kind.as_str().to_string(),
                    amount: line.amount,
                });
            }

            let mut created = Vec::with_capacity(draft.installments.len());
            for staged in &draft.installments {
                // At-most-once per (advance, month).
                if tables
                    .installments
                    .iter()
                    .any(|i| i.advance_id == staged.advance_id && i.month == payroll.month)
                {
                    continue;
                }
                let advance = tables.advances.get_mut(&staged.advance_id).ok_or_else(|| {
                    GatewayError::Validation(anyhow::anyhow!(
                        "Advance {} not found",
                        staged.advance_id
                    ))
                })?;

                let paid = advance.paid_installments + 1;
                advance.paid_installments = paid;
                advance.remaining_amount = advance.balance_after(paid);
                advance.status = if advance.remaining_amount.is_zero() {
                    AdvanceStatus::Completed.as_str().to_string()
                } else {
                    AdvanceStatus::InProgress.as_str().to_string()
                };

                let installment = AdvanceInstallment {
                    installment_id: Uuid::new_v4(),
                    advance_id: staged.advance_id,
                    payroll_id: payroll.payroll_id,
                    month: payroll.month,
                    amount: staged.amount,
                    installment_number: staged.installment_number,
                    created_utc: Utc::now(),
                };
                tables.installments.push(installment.clone());
                created.push(installment);
            }

            PayrollCommit {
                payroll: payroll.clone(),
                installments: created,
            }
        };
        self.apply_finalize(finalize).await?;
        Ok(commit)
    }

    async fn transition_payroll(
        &self,
        payroll_id: Uuid,
        expected: PayrollStatus,
        transition: PayrollTransition,
        finalize: Option<Finalize>,
    ) -> Result<Payroll, GatewayError> {
        let _guard = self
            .locks
            .acquire("payroll", payroll_id, self.lock_timeout)
            .await?;

        let updated = {
            let mut tables = self.tables.lock().unwrap();
            let payroll = tables.payrolls.get_mut(&payroll_id).ok_or_else(|| {
                GatewayError::NotFound(anyhow::anyhow!("Payroll {} not found", payroll_id))
            })?;

            if payroll.status != expected.as_str() {
                return Err(GatewayError::Validation(anyhow::anyhow!(
                    "Payroll {} is '{}', expected '{}'",
                    payroll_id,
                    payroll.status,
                    expected.as_str()
                )));
            }

            let now = Utc::now();
            match &transition {
                PayrollTransition::Approve { approved_by } => {
                    payroll.approved_by = Some(approved_by.clone());
                    payroll.approved_utc = Some(now);
                }
                PayrollTransition::Pay {
                    payment_method,
                    payment_reference,
                    settlement_entry_id,
                } => {
                    payroll.payment_method = payment_method.clone();
                    payroll.payment_reference = Some(payment_reference.clone());
                    payroll.settlement_entry_id = Some(*settlement_entry_id);
                    payroll.paid_utc = Some(now);
                }
                PayrollTransition::Cancel => {}
            }
            payroll.status = transition.target().as_str().to_string();
            payroll.clone()
        };
        self.apply_finalize(finalize).await?;
        Ok(updated)
    }

    async fn link_journal_entry(
        &self,
        payroll_id: Uuid,
        entry_id: Uuid,
    ) -> Result<(), GatewayError> {
        let mut tables = self.tables.lock().unwrap();
        let payroll = tables.payrolls.get_mut(&payroll_id).ok_or_else(|| {
            GatewayError::NotFound(anyhow::anyhow!("Payroll {} not found", payroll_id))
        })?;
        payroll.journal_entry_id = Some(entry_id);
        Ok(())
    }
}
