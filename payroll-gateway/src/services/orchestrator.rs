//! The payroll orchestrator.
//!
//! One governed, idempotent workflow per operation: authority check,
//! idempotency resolution, row-locked validation and computation, one
//! atomic persist, optional ledger posting, audit. Concurrent callers for
//! the same employee serialize on the employee row lock; duplicate keys
//! replay the original result instead of re-executing.

use crate::models::{
    component::ADVANCE_RECOVERY_CODE, month_start, Advance, AdvanceInstallment, ComponentKind,
    Payroll, PayrollStatus,
};
use crate::services::calculator::{
    compute_components, derive_totals, verify_lines, RuleSet,
};
use crate::services::metrics::{ADVANCE_INSTALLMENTS_TOTAL, ERRORS_TOTAL, PAYROLLS_TOTAL};
use crate::services::posting::{accrual_lines, settlement_lines, PayrollAccounts};
use crate::store::{
    NewPayrollLine, PayrollDraft, PayrollStore, PayrollTransition, StagedInstallment,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use gateway_core::audit::{Auditor, NewAuditEntry};
use gateway_core::authority::{capabilities, services, AuthorityTable};
use gateway_core::governance::{hooks, HookGovernance};
use gateway_core::idempotency::{
    operations, replay_result, Begin, Finalize, IdempotencyRecord, IdempotencyStore,
};
use gateway_core::GatewayError;
use ledger_gateway::models::entry_types;
use ledger_gateway::services::{LedgerEngine, PostJournalEntry};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

mod audit_ops {
    pub const PAYROLL_CREATE: &str = "PAYROLL_CREATE";
    pub const PAYROLL_CREATE_FAILED: &str = "PAYROLL_CREATE_FAILED";
    pub const PAYROLL_APPROVE: &str = "PAYROLL_APPROVE";
    pub const PAYROLL_APPROVE_FAILED: &str = "PAYROLL_APPROVE_FAILED";
    pub const PAYROLL_PAY: &str = "PAYROLL_PAY";
    pub const PAYROLL_PAY_FAILED: &str = "PAYROLL_PAY_FAILED";
    pub const PAYROLL_CANCEL: &str = "PAYROLL_CANCEL";
    pub const PAYROLL_CANCEL_FAILED: &str = "PAYROLL_CANCEL_FAILED";
}

/// Request to create a payroll for one employee and month.
#[derive(Debug, Clone)]
pub struct CreatePayroll {
    pub caller: String,
    pub employee_id: Uuid,
    pub month: NaiveDate,
    pub idempotency_key: String,
    pub actor: String,
    /// Explicit contract; when absent the active contract covering the
    /// month is used.
    pub contract_id: Option<Uuid>,
    pub payment_method: String,
    pub workflow: String,
    /// Post the accrual journal entry after the payroll commits.
    pub post_to_ledger: bool,
}

#[derive(Debug, Clone)]
pub struct ApprovePayroll {
    pub caller: String,
    pub payroll_id: Uuid,
    pub idempotency_key: String,
    pub actor: String,
}

#[derive(Debug, Clone)]
pub struct ProcessPayment {
    pub caller: String,
    pub payroll_id: Uuid,
    pub idempotency_key: String,
    pub actor: String,
    pub payment_method: String,
    pub payment_reference: String,
    /// Cash/bank account the liability settles against; must resolve to
    /// an active chart account.
    pub settlement_account: String,
}

#[derive(Debug, Clone)]
pub struct CancelPayroll {
    pub caller: String,
    pub payroll_id: Uuid,
    pub idempotency_key: String,
    pub actor: String,
}

/// Narrow port to the advance-management collaborator. Notifications are
/// post-commit and best-effort: a failure never unwinds the installment.
#[async_trait]
pub trait AdvanceEvents: Send + Sync {
    async fn installment_recorded(
        &self,
        advance: &Advance,
        installment: &AdvanceInstallment,
    ) -> Result<(), GatewayError>;
}

pub struct NoopAdvanceEvents;

#[async_trait]
impl AdvanceEvents for NoopAdvanceEvents {
    async fn installment_recorded(
        &self,
        _advance: &Advance,
        _installment: &AdvanceInstallment,
    ) -> Result<(), GatewayError> {
        Ok(())
    }
}

pub struct PayrollGateway {
    store: Arc<dyn PayrollStore>,
    ledger: Arc<LedgerEngine>,
    idempotency: Arc<dyn IdempotencyStore>,
    authority: Arc<AuthorityTable>,
    auditor: Auditor,
    rules: RuleSet,
    accounts: PayrollAccounts,
    governance: HookGovernance,
    advance_events: Arc<dyn AdvanceEvents>,
}

impl PayrollGateway {
    pub fn new(
        store: Arc<dyn PayrollStore>,
        ledger: Arc<LedgerEngine>,
        idempotency: Arc<dyn IdempotencyStore>,
        authority: Arc<AuthorityTable>,
        auditor: Auditor,
    ) -> Self {
        if !store.capabilities().row_locks {
            warn!(
                "Payroll store reports no row-lock support; concurrent callers \
                 serialize only through unique constraints"
            );
        }
        Self {
            store,
            ledger,
            idempotency,
            authority,
            auditor,
            rules: RuleSet::new(),
            accounts: PayrollAccounts::default(),
            governance: HookGovernance::default(),
            advance_events: Arc::new(NoopAdvanceEvents),
        }
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_accounts(mut self, accounts: PayrollAccounts) -> Self {
        self.accounts = accounts;
        self
    }

    pub fn with_governance(mut self, governance: HookGovernance) -> Self {
        self.governance = governance;
        self
    }

    pub fn with_advance_events(mut self, advance_events: Arc<dyn AdvanceEvents>) -> Self {
        self.advance_events = advance_events;
        self
    }

    pub fn store(&self) -> &Arc<dyn PayrollStore> {
        &self.store
    }

    pub fn accounts(&self) -> &PayrollAccounts {
        &self.accounts
    }

    // Create ---------------------------------------------------------------

    #[instrument(skip(self, req), fields(employee_id = %req.employee_id, month = %req.month, key = %req.idempotency_key))]
    pub async fn create_payroll(&self, req: CreatePayroll) -> Result<Payroll, GatewayError> {
        let started = Instant::now();
        match self.create_inner(&req, started).await {
            Ok(payroll) => Ok(payroll),
            Err(err) => {
                ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();
                self.auditor
                    .record(
                        NewAuditEntry::new(
                            "Payroll",
                            req.employee_id,
                            audit_ops::PAYROLL_CREATE_FAILED,
                            &req.actor,
                        )
                        .from_service(&req.caller)
                        .with_context(serde_json::json!({
                            "error": err.to_string(),
                            "month": req.month.to_string(),
                            "idempotency_key": req.idempotency_key,
                        }))
                        .took(started.elapsed().as_secs_f64()),
                    )
                    .await;
                Err(err)
            }
        }
    }

    async fn create_inner(
        &self,
        req: &CreatePayroll,
        started: Instant,
    ) -> Result<Payroll, GatewayError> {
        self.authority
            .authorize(&req.caller, capabilities::PAYROLL_CREATE)?;
        let month = month_start(req.month);

        let record = match self
            .idempotency
            .begin(
                operations::PAYROLL_CREATE,
                &req.idempotency_key,
                &req.actor,
                operations::ttl(operations::PAYROLL_CREATE),
            )
            .await?
        {
            Begin::Replay(record) => {
                let payroll_id = replay_result(&record, "payroll_id")?;
                let payroll = self.store.payroll(payroll_id).await?.ok_or_else(|| {
                    GatewayError::Idempotency(anyhow::anyhow!(
                        "Stored payroll {} for key '{}' no longer exists",
                        payroll_id,
                        req.idempotency_key
                    ))
                })?;
                PAYROLLS_TOTAL.with_label_values(&["replay"]).inc();
                // Self-heal: a crash between commit and posting left no
                // journal link; the derived key makes the re-post exactly-once.
                return if req.post_to_ledger && payroll.journal_entry_id.is_none() {
                    self.post_accrual(&payroll, &req.actor).await
                } else {
                    Ok(payroll)
                };
            }
            Begin::InFlight(_) => {
                return Err(GatewayError::Concurrency(anyhow::anyhow!(
                    "Payroll creation for key '{}' is still in flight",
                    req.idempotency_key
                )));
            }
            Begin::Fresh(record) => record,
        };

        match self.execute_create(req, &record, month, started).await {
            Ok(payroll) => Ok(payroll),
            Err(err) => {
                self.abandon_record(record.record_id, &err).await;
                Err(err)
            }
        }
    }

    async fn execute_create(
        &self,
        req: &CreatePayroll,
        record: &IdempotencyRecord,
        month: NaiveDate,
        started: Instant,
    ) -> Result<Payroll, GatewayError> {
        // Serialize concurrent runs for this employee for the rest of the
        // operation.
        let _lock = self.store.lock_employee(req.employee_id).await?;

        let employee = self.store.employee(req.employee_id).await?.ok_or_else(|| {
            GatewayError::Validation(anyhow::anyhow!("Employee {} not found", req.employee_id))
        })?;
        if !employee.active {
            return Err(GatewayError::Validation(anyhow::anyhow!(
                "Employee {} is not active",
                req.employee_id
            )));
        }

        let contract = match req.contract_id {
            Some(contract_id) => {
                let contract = self.store.contract(contract_id).await?.ok_or_else(|| {
                    GatewayError::Validation(anyhow::anyhow!("Contract {} not found", contract_id))
                })?;
                if contract.employee_id != req.employee_id {
                    return Err(GatewayError::Validation(anyhow::anyhow!(
                        "Contract {} does not belong to employee {}",
                        contract_id,
                        req.employee_id
                    )));
                }
                if !contract.active || !contract.covers(month) {
                    return Err(GatewayError::Validation(anyhow::anyhow!(
                        "Contract {} is not active for {}",
                        contract_id,
                        month
                    )));
                }
                contract
            }
            None => self
                .store
                .active_contract_for(req.employee_id, month)
                .await?
                .ok_or_else(|| {
                    GatewayError::Validation(anyhow::anyhow!(
                        "No active contract covers {} for employee {}",
                        month,
                        req.employee_id
                    ))
                })?,
        };

        if self.store.payroll_for(req.employee_id, month).await?.is_some() {
            return Err(GatewayError::Validation(anyhow::anyhow!(
                "Payroll already exists for employee {} and month {}",
                req.employee_id,
                month
            )));
        }

        let components = self.store.components_effective(month).await?;
        if components.is_empty() {
            return Err(GatewayError::Validation(anyhow::anyhow!(
                "No active salary components are effective for {}",
                month
            )));
        }

        let (mut lines, buckets) =
            compute_components(&components, &employee, month, &contract, &self.rules)?;

        // Advance-deduction coordination: at most one installment per
        // (advance, month), next amount capped by the remaining balance.
        let mut staged = Vec::new();
        let mut advance_total = Decimal::ZERO;
        for advance in self.store.open_advances(req.employee_id).await? {
            if !advance.deductible_for(month) {
                continue;
            }
            if self
                .store
                .installment_exists(advance.advance_id, month)
                .await?
            {
                continue;
            }
            let amount = advance.next_installment_amount();
            if amount <= Decimal::ZERO {
                continue;
            }
            advance_total += amount;
            staged.push(StagedInstallment {
                advance_id: advance.advance_id,
                amount,
                installment_number: advance.paid_installments + 1,
            });
        }
        if advance_total > Decimal::ZERO {
            lines.push(NewPayrollLine {
                component_code: ADVANCE_RECOVERY_CODE.to_string(),
                name: "Advance recovery".to_string(),
                kind: ComponentKind::Deduction,
                amount: advance_total,
            });
        }

        let totals = derive_totals(&buckets, advance_total);
        if totals.net < Decimal::ZERO {
            warn!(
                employee_id = %req.employee_id,
                month = %month,
                net = %totals.net,
                "Computed negative net salary"
            );
        }

        verify_lines(&lines, &buckets, advance_total)?;

        let payroll_id = Uuid::new_v4();
        let payroll = Payroll {
            payroll_id,
            employee_id: req.employee_id,
            month,
            contract_id: contract.contract_id,
            basic: buckets.basic,
            allowances: buckets.allowances,
            overtime: buckets.overtime,
            bonus: buckets.bonus,
            insurance: buckets.insurance,
            tax: buckets.tax,
            absence: buckets.absence,
            late: buckets.late,
            advance_deduction: advance_total,
            other_deductions: buckets.other,
            gross: totals.gross,
            total_additions: totals.total_additions,
            total_deductions: totals.total_deductions,
            net: totals.net,
            status: PayrollStatus::Calculated.as_str().to_string(),
            workflow: req.workflow.clone(),
            payment_method: req.payment_method.clone(),
            payment_reference: None,
            journal_entry_id: None,
            settlement_entry_id: None,
            approved_by: None,
            approved_utc: None,
            paid_utc: None,
            created_by: req.actor.clone(),
            created_utc: Utc::now(),
        };

        let draft = PayrollDraft {
            payroll,
            lines,
            installments: staged,
        };
        let finalize = Finalize {
            record_id: record.record_id,
            result: serde_json::json!({
                "payroll_id": payroll_id.to_string(),
                "employee_id": req.employee_id.to_string(),
                "month": month.to_string(),
            }),
        };

        let commit = self.store.insert_payroll(&draft, Some(finalize)).await?;
        ADVANCE_INSTALLMENTS_TOTAL.inc_by(commit.installments.len() as f64);
        info!(
            payroll_id = %commit.payroll.payroll_id,
            net = %commit.payroll.net,
            installments = commit.installments.len(),
            "Payroll created"
        );

        self.notify_installments(&commit.installments).await;

        let mut payroll = commit.payroll;
        if req.post_to_ledger {
            payroll = self.post_accrual(&payroll, &req.actor).await?;
        }

        PAYROLLS_TOTAL.with_label_values(&["created"]).inc();
        self.auditor
            .record(
                NewAuditEntry::new(
                    "Payroll",
                    payroll.payroll_id,
                    audit_ops::PAYROLL_CREATE,
                    &req.actor,
                )
                .from_service(&req.caller)
                .with_after(serde_json::to_value(&payroll).unwrap_or_default())
                .with_context(serde_json::json!({
                    "month": month.to_string(),
                    "workflow": req.workflow,
                    "idempotency_key": req.idempotency_key,
                }))
                .took(started.elapsed().as_secs_f64()),
            )
            .await;

        Ok(payroll)
    }

    /// Post-commit, governed, best-effort notification per installment.
    async fn notify_installments(&self, installments: &[AdvanceInstallment]) {
        for installment in installments {
            if !self
                .governance
                .should_fire(hooks::ADVANCE_INSTALLMENT_RECORDED, installment.advance_id)
            {
                continue;
            }
            let advance = match self.store.advance(installment.advance_id).await {
                Ok(Some(advance)) => advance,
                _ => continue,
            };
            if let Err(err) = self
                .advance_events
                .installment_recorded(&advance, installment)
                .await
            {
                warn!(
                    advance_id = %installment.advance_id,
                    error = %err,
                    "Advance notification failed; installment remains committed"
                );
            }
        }
    }

    /// Post the accrual entry and link it; the derived key keeps this
    /// exactly-once across retries.
    async fn post_accrual(&self, payroll: &Payroll, actor: &str) -> Result<Payroll, GatewayError> {
        let entry = self
            .ledger
            .create_journal_entry(PostJournalEntry {
                caller: services::PAYROLL_GATEWAY.to_string(),
                source_module: "payroll".to_string(),
                source_model: "Payroll".to_string(),
                source_id: payroll.payroll_id.to_string(),
                lines: accrual_lines(payroll, &self.accounts),
                idempotency_key: format!("PAYROLL:{}:accrual", payroll.payroll_id),
                actor: actor.to_string(),
                entry_type: entry_types::PAYROLL_ACCRUAL.to_string(),
                description: format!("Payroll accrual for {}", payroll.month.format("%Y-%m")),
                entry_date: payroll.month,
            })
            .await?;
        self.store
            .link_journal_entry(payroll.payroll_id, entry.entry_id)
            .await?;

        let mut updated = payroll.clone();
        updated.journal_entry_id = Some(entry.entry_id);
        Ok(updated)
    }

    // Approve --------------------------------------------------------------

    #[instrument(skip(self, req), fields(payroll_id = %req.payroll_id, key = %req.idempotency_key))]
    pub async fn approve_payroll(&self, req: ApprovePayroll) -> Result<Payroll, GatewayError> {
        let started = Instant::now();
        match self.approve_inner(&req, started).await {
            Ok(payroll) => Ok(payroll),
            Err(err) => {
                ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();
                self.auditor
                    .record(
                        NewAuditEntry::new(
                            "Payroll",
                            req.payroll_id,
                            audit_ops::PAYROLL_APPROVE_FAILED,
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

    async fn approve_inner(
        &self,
        req: &ApprovePayroll,
        started: Instant,
    ) -> Result<Payroll, GatewayError> {
        self.authority
            .authorize(&req.caller, capabilities::PAYROLL_APPROVE)?;

        let record = match self
            .idempotency
            .begin(
                operations::PAYROLL_APPROVE,
                &req.idempotency_key,
                &req.actor,
                operations::ttl(operations::PAYROLL_APPROVE),
            )
            .await?
        {
            Begin::Replay(record) => {
                let payroll_id = replay_result(&record, "payroll_id")?;
                return self.store.payroll(payroll_id).await?.ok_or_else(|| {
                    GatewayError::Idempotency(anyhow::anyhow!(
                        "Stored payroll {} for key '{}' no longer exists",
                        payroll_id,
                        req.idempotency_key
                    ))
                });
            }
            Begin::InFlight(_) => {
                return Err(GatewayError::Concurrency(anyhow::anyhow!(
                    "Approval for key '{}' is still in flight",
                    req.idempotency_key
                )));
            }
            Begin::Fresh(record) => record,
        };

        let result = async {
            let before = self.store.payroll(req.payroll_id).await?.ok_or_else(|| {
                GatewayError::NotFound(anyhow::anyhow!("Payroll {} not found", req.payroll_id))
            })?;

            let updated = self
                .store
                .transition_payroll(
                    req.payroll_id,
                    PayrollStatus::Calculated,
                    PayrollTransition::Approve {
                        approved_by: req.actor.clone(),
                    },
                    Some(Finalize {
                        record_id: record.record_id,
                        result: serde_json::json!({ "payroll_id": req.payroll_id.to_string() }),
                    }),
                )
                .await?;
            Ok::<(Payroll, Payroll), GatewayError>((before, updated))
        }
        .await;

        match result {
            Ok((before, updated)) => {
                PAYROLLS_TOTAL.with_label_values(&["approved"]).inc();
                self.auditor
                    .record(
                        NewAuditEntry::new(
                            "Payroll",
                            updated.payroll_id,
                            audit_ops::PAYROLL_APPROVE,
                            &req.actor,
                        )
                        .from_service(&req.caller)
                        .with_before(serde_json::to_value(&before).unwrap_or_default())
                        .with_after(serde_json::to_value(&updated).unwrap_or_default())
                        .took(started.elapsed().as_secs_f64()),
                    )
                    .await;
                Ok(updated)
            }
            Err(err) => {
                self.abandon_record(record.record_id, &err).await;
                Err(err)
            }
        }
    }

    // Pay -------------------------------------------------------------------

    #[instrument(skip(self, req), fields(payroll_id = %req.payroll_id, key = %req.idempotency_key))]
    pub async fn process_payment(&self, req: ProcessPayment) -> Result<Payroll, GatewayError> {
        let started = Instant::now();
        match self.pay_inner(&req, started).await {
            Ok(payroll) => Ok(payroll),
            Err(err) => {
                ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();
                self.auditor
                    .record(
                        NewAuditEntry::new(
                            "Payroll",
                            req.payroll_id,
                            audit_ops::PAYROLL_PAY_FAILED,
                            &req.actor,
                        )
                        .from_service(&req.caller)
                        .with_context(serde_json::json!({
                            "error": err.to_string(),
                            "idempotency_key": req.idempotency_key,
                            "settlement_account": req.settlement_account,
                        }))
                        .took(started.elapsed().as_secs_f64()),
                    )
                    .await;
                Err(err)
            }
        }
    }

    async fn pay_inner(
        &self,
        req: &ProcessPayment,
        started: Instant,
    ) -> Result<Payroll, GatewayError> {
        self.authority
            .authorize(&req.caller, capabilities::PAYROLL_PAY)?;

        let record = match self
            .idempotency
            .begin(
                operations::PAYROLL_PAY,
                &req.idempotency_key,
                &req.actor,
                operations::ttl(operations::PAYROLL_PAY),
            )
            .await?
        {
            Begin::Replay(record) => {
                let payroll_id = replay_result(&record, "payroll_id")?;
                return self.store.payroll(payroll_id).await?.ok_or_else(|| {
                    GatewayError::Idempotency(anyhow::anyhow!(
                        "Stored payroll {} for key '{}' no longer exists",
                        payroll_id,
                        req.idempotency_key
                    ))
                });
            }
            Begin::InFlight(_) => {
                return Err(GatewayError::Concurrency(anyhow::anyhow!(
                    "Payment for key '{}' is still in flight",
                    req.idempotency_key
                )));
            }
            Begin::Fresh(record) => record,
        };

        match self.execute_pay(req, &record, started).await {
            Ok(payroll) => Ok(payroll),
            Err(err) => {
                self.abandon_record(record.record_id, &err).await;
                Err(err)
            }
        }
    }

    async fn execute_pay(
        &self,
        req: &ProcessPayment,
        record: &IdempotencyRecord,
        started: Instant,
    ) -> Result<Payroll, GatewayError> {
        let before = self.store.payroll(req.payroll_id).await?.ok_or_else(|| {
            GatewayError::NotFound(anyhow::anyhow!("Payroll {} not found", req.payroll_id))
        })?;
        if before.parsed_status() != Some(PayrollStatus::Approved) {
            return Err(GatewayError::Validation(anyhow::anyhow!(
                "Payroll {} is '{}', expected 'approved'",
                req.payroll_id,
                before.status
            )));
        }

        // Fail closed on the settlement account before posting anything.
        self.ledger
            .resolve_active_account(&req.settlement_account)
            .await?;

        // Post the settlement first, under a payroll-stable key: a crash
        // between posting and the transition heals on retry because the
        // ledger replays the same entry.
        let lines = settlement_lines(&before, &self.accounts, &req.settlement_account)?;
        let entry = self
            .ledger
            .create_journal_entry(PostJournalEntry {
                caller: services::PAYROLL_GATEWAY.to_string(),
                source_module: "payroll".to_string(),
                source_model: "Payroll".to_string(),
                source_id: before.payroll_id.to_string(),
                lines,
                idempotency_key: format!("PAYROLL:{}:settlement", before.payroll_id),
                actor: req.actor.to_string(),
                entry_type: entry_types::PAYROLL_PAYMENT.to_string(),
                description: format!(
                    "Salary payment for {}",
                    before.month.format("%Y-%m")
                ),
                entry_date: before.month,
            })
            .await?;

        let updated = self
            .store
            .transition_payroll(
                req.payroll_id,
                PayrollStatus::Approved,
                PayrollTransition::Pay {
                    payment_method: req.payment_method.clone(),
                    payment_reference: req.payment_reference.clone(),
                    settlement_entry_id: entry.entry_id,
                },
                Some(Finalize {
                    record_id: record.record_id,
                    result: serde_json::json!({ "payroll_id": req.payroll_id.to_string() }),
                }),
            )
            .await?;

        PAYROLLS_TOTAL.with_label_values(&["paid"]).inc();
        self.auditor
            .record(
                NewAuditEntry::new(
                    "Payroll",
                    updated.payroll_id,
                    audit_ops::PAYROLL_PAY,
                    &req.actor,
                )
                .from_service(&req.caller)
                .with_before(serde_json::to_value(&before).unwrap_or_default())
                .with_after(serde_json::to_value(&updated).unwrap_or_default())
                .with_context(serde_json::json!({
                    "settlement_entry_id": entry.entry_id.to_string(),
                    "payment_reference": req.payment_reference,
                }))
                .took(started.elapsed().as_secs_f64()),
            )
            .await;

        Ok(updated)
    }

    // Cancel ----------------------------------------------------------------

    #[instrument(skip(self, req), fields(payroll_id = %req.payroll_id, key = %req.idempotency_key))]
    pub async fn cancel_payroll(&self, req: CancelPayroll) -> Result<Payroll, GatewayError> {
        let started = Instant::now();
        match self.cancel_inner(&req, started).await {
            Ok(payroll) => Ok(payroll),
            Err(err) => {
                ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();
                self.auditor
                    .record(
                        NewAuditEntry::new(
                            "Payroll",
                            req.payroll_id,
                            audit_ops::PAYROLL_CANCEL_FAILED,
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

    async fn cancel_inner(
        &self,
        req: &CancelPayroll,
        started: Instant,
    ) -> Result<Payroll, GatewayError> {
        self.authority
            .authorize(&req.caller, capabilities::PAYROLL_CANCEL)?;

        let record = match self
            .idempotency
            .begin(
                operations::PAYROLL_CANCEL,
                &req.idempotency_key,
                &req.actor,
                operations::ttl(operations::PAYROLL_CANCEL),
            )
            .await?
        {
            Begin::Replay(record) => {
                let payroll_id = replay_result(&record, "payroll_id")?;
                return self.store.payroll(payroll_id).await?.ok_or_else(|| {
                    GatewayError::Idempotency(anyhow::anyhow!(
                        "Stored payroll {} for key '{}' no longer exists",
                        payroll_id,
                        req.idempotency_key
                    ))
                });
            }
            Begin::InFlight(_) => {
                return Err(GatewayError::Concurrency(anyhow::anyhow!(
                    "Cancellation for key '{}' is still in flight",
                    req.idempotency_key
                )));
            }
            Begin::Fresh(record) => record,
        };

        let result = self
            .store
            .transition_payroll(
                req.payroll_id,
                PayrollStatus::Calculated,
                PayrollTransition::Cancel,
                Some(Finalize {
                    record_id: record.record_id,
                    result: serde_json::json!({ "payroll_id": req.payroll_id.to_string() }),
                }),
            )
            .await;

        match result {
            Ok(updated) => {
                PAYROLLS_TOTAL.with_label_values(&["cancelled"]).inc();
                self.auditor
                    .record(
                        NewAuditEntry::new(
                            "Payroll",
                            updated.payroll_id,
                            audit_ops::PAYROLL_CANCEL,
                            &req.actor,
                        )
                        .from_service(&req.caller)
                        .with_after(serde_json::to_value(&updated).unwrap_or_default())
                        .took(started.elapsed().as_secs_f64()),
                    )
                    .await;
                Ok(updated)
            }
            Err(err) => {
                self.abandon_record(record.record_id, &err).await;
                Err(err)
            }
        }
    }

    /// Clean up a fresh idempotency record after a failed execution:
    /// retryable infrastructure failures free the key, deterministic
    /// failures burn it with the stored error. Records completed inside
    /// the business transaction are untouched.
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
