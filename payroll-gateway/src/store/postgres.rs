//! PostgreSQL payroll store.
//!
//! Row locks (`SELECT ... FOR UPDATE`) serialize concurrent writers to
//! one employee, advance or payroll; `SET LOCAL lock_timeout` turns a
//! stuck wait into the retryable concurrency error instead of a generic
//! failure.

use super::{
    EntityLock, PayrollCommit, PayrollDraft, PayrollStore, PayrollTransition, StoreCapabilities,
};
use crate::models::{
    month_end, month_start, Advance, AdvanceInstallment, AdvanceStatus, Contract, Employee,
    Payroll, PayrollLine, PayrollStatus, SalaryComponent,
};
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use gateway_core::idempotency::Finalize;
use gateway_core::GatewayError;
use sqlx::postgres::{PgPool, Postgres};
use sqlx::Transaction;
use tracing::{info, instrument};
use uuid::Uuid;

const PAYROLL_COLUMNS: &str = "payroll_id, employee_id, month, contract_id, basic, allowances, overtime, bonus, insurance, tax, absence, late, advance_deduction, other_deductions, gross, total_additions, total_deductions, net, status, workflow, payment_method, payment_reference, journal_entry_id, settlement_entry_id, approved_by, approved_utc, paid_utc, created_by, created_utc";

const ADVANCE_COLUMNS: &str = "advance_id, employee_id, amount, installment_count, installment_amount, remaining_amount, paid_installments, deduction_start_month, status, created_utc";

/// PostgreSQL lock-wait timeout error code.
const LOCK_NOT_AVAILABLE: &str = "55P03";

struct PgEntityLock {
    // Holding the open transaction holds the row lock; dropping it
    // releases both.
    _tx: Transaction<'static, Postgres>,
}

impl EntityLock for PgEntityLock {}

#[derive(Clone)]
pub struct PostgresPayrollStore {
    pool: PgPool,
    lock_timeout_ms: u64,
}

impl PostgresPayrollStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout_ms: 5_000,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout_ms: u64) -> Self {
        self.lock_timeout_ms = lock_timeout_ms;
        self
    }

    /// Run the payroll migrations.
    pub async fn run_migrations(&self) -> Result<(), GatewayError> {
        info!("Running payroll migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| GatewayError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        Ok(())
    }

    async fn set_lock_timeout(
        &self,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<(), GatewayError> {
        // SET does not take bind parameters.
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout_ms))
            .execute(&mut **tx)
            .await
            .map_err(|e| map_db_err("Failed to set lock timeout", e))?;
        Ok(())
    }
}

fn map_db_err(context: &str, e: sqlx::Error) -> GatewayError {
    match &e {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE) => {
            GatewayError::Concurrency(anyhow::anyhow!("Lock wait timed out: {}", context))
        }
        _ => GatewayError::DatabaseError(anyhow::anyhow!("{}: {}", context, e)),
    }
}

#[async_trait]
impl PayrollStore for PostgresPayrollStore {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities { row_locks: true }
    }

    async fn insert_employee(&self, employee: &Employee) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            INSERT INTO employees (employee_id, staff_code, full_name, active, created_utc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(employee.employee_id)
        .bind(&employee.staff_code)
        .bind(&employee.full_name)
        .bind(employee.active)
        .bind(employee.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to insert employee", e))?;
        Ok(())
    }

    async fn employee(&self, employee_id: Uuid) -> Result<Option<Employee>, GatewayError> {
        sqlx::query_as::<_, Employee>(
            "SELECT employee_id, staff_code, full_name, active, created_utc FROM employees WHERE employee_id = $1",
        )
        .bind(employee_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to fetch employee", e))
    }

    async fn insert_contract(&self, contract: &Contract) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            INSERT INTO contracts (contract_id, employee_id, basic_salary, start_date, end_date, active)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(contract.contract_id)
        .bind(contract.employee_id)
        .bind(contract.basic_salary)
        .bind(contract.start_date)
        .bind(contract.end_date)
        .bind(contract.active)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to insert contract", e))?;
        Ok(())
    }

    async fn contract(&self, contract_id: Uuid) -> Result<Option<Contract>, GatewayError> {
        sqlx::query_as::<_, Contract>(
            "SELECT contract_id, employee_id, basic_salary, start_date, end_date, active FROM contracts WHERE contract_id = $1",
        )
        .bind(contract_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to fetch contract", e))
    }

    async fn active_contract_for(
        &self,
        employee_id: Uuid,
        month: NaiveDate,
    ) -> Result<Option<Contract>, GatewayError> {
        sqlx::query_as::<_, Contract>(
            r#"
            SELECT contract_id, employee_id, basic_salary, start_date, end_date, active
            FROM contracts
            WHERE employee_id = $1
              AND active
              AND start_date <= $2
              AND (end_date IS NULL OR end_date >= $3)
            ORDER BY start_date DESC
            LIMIT 1
            "#,
        )
        .bind(employee_id)
        .bind(month_end(month))
        .bind(month_start(month))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to fetch contract", e))
    }

    async fn insert_component(&self, component: &SalaryComponent) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            INSERT INTO salary_components
                (component_id, code, name, kind, method, amount, effective_from, effective_to, active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(component.component_id)
        .bind(&component.code)
        .bind(&component.name)
        .bind(&component.kind)
        .bind(&component.method)
        .bind(component.amount)
        .bind(component.effective_from)
        .bind(component.effective_to)
        .bind(component.active)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to insert component", e))?;
        Ok(())
    }

    async fn components_effective(
        &self,
        month: NaiveDate,
    ) -> Result<Vec<SalaryComponent>, GatewayError> {
        sqlx::query_as::<_, SalaryComponent>(
            r#"
            SELECT component_id, code, name, kind, method, amount, effective_from, effective_to, active
            FROM salary_components
            WHERE active
              AND effective_from <= $1
              AND (effective_to IS NULL OR effective_to >= $1)
            ORDER BY code
            "#,
        )
        .bind(month)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to fetch components", e))
    }

    async fn insert_advance(&self, advance: &Advance) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            INSERT INTO advances
                (advance_id, employee_id, amount, installment_count, installment_amount,
                 remaining_amount, paid_installments, deduction_start_month, status, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(advance.advance_id)
        .bind(advance.employee_id)
        .bind(advance.amount)
        .bind(advance.installment_count)
        .bind(advance.installment_amount)
        .bind(advance.remaining_amount)
        .bind(advance.paid_installments)
        .bind(advance.deduction_start_month)
        .bind(&advance.status)
        .bind(advance.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to insert advance", e))?;
        Ok(())
    }

    async fn advance(&self, advance_id: Uuid) -> Result<Option<Advance>, GatewayError> {
        sqlx::query_as::<_, Advance>(&format!(
            "SELECT {ADVANCE_COLUMNS} FROM advances WHERE advance_id = $1"
        ))
        .bind(advance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to fetch advance", e))
    }

    async fn open_advances(&self, employee_id: Uuid) -> Result<Vec<Advance>, GatewayError> {
        sqlx::query_as::<_, Advance>(&format!(
            r#"
            SELECT {ADVANCE_COLUMNS}
            FROM advances
            WHERE employee_id = $1
              AND status IN ('paid', 'in_progress')
              AND remaining_amount > 0
            ORDER BY created_utc
            "#
        ))
        .bind(employee_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to fetch advances", e))
    }

    async fn installment_exists(
        &self,
        advance_id: Uuid,
        month: NaiveDate,
    ) -> Result<bool, GatewayError> {
        let found: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM advance_installments WHERE advance_id = $1 AND month = $2",
        )
        .bind(advance_id)
        .bind(month)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to check installment", e))?;
        Ok(found.is_some())
    }

    async fn installments_for_advance(
        &self,
        advance_id: Uuid,
    ) -> Result<Vec<AdvanceInstallment>, GatewayError> {
        sqlx::query_as::<_, AdvanceInstallment>(
            r#"
            SELECT installment_id, advance_id, payroll_id, month, amount, installment_number, created_utc
            FROM advance_installments
            WHERE advance_id = $1
            ORDER BY installment_number
            "#,
        )
        .bind(advance_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to fetch installments", e))
    }

    #[instrument(skip(self))]
    async fn lock_employee(&self, employee_id: Uuid) -> Result<Box<dyn EntityLock>, GatewayError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("Failed to begin lock transaction", e))?;
        self.set_lock_timeout(&mut tx).await?;

        sqlx::query("SELECT employee_id FROM employees WHERE employee_id = $1 FOR UPDATE")
            .bind(employee_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_db_err("Failed to lock employee", e))?;

        Ok(Box::new(PgEntityLock { _tx: tx }))
    }

    async fn payroll(&self, payroll_id: Uuid) -> Result<Option<Payroll>, GatewayError> {
        sqlx::query_as::<_, Payroll>(&format!(
            "SELECT {PAYROLL_COLUMNS} FROM payrolls WHERE payroll_id = $1"
        ))
        .bind(payroll_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to fetch payroll", e))
    }

    async fn payroll_for(
        &self,
        employee_id: Uuid,
        month: NaiveDate,
    ) -> Result<Option<Payroll>, GatewayError> {
        sqlx::query_as::<_, Payroll>(&format!(
            "SELECT {PAYROLL_COLUMNS} FROM payrolls WHERE employee_id = $1 AND month = $2"
        ))
        .bind(employee_id)
        .bind(month)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to fetch payroll", e))
    }

    async fn payroll_lines(&self, payroll_id: Uuid) -> Result<Vec<PayrollLine>, GatewayError> {
        sqlx::query_as::<_, PayrollLine>(
            r#"
            SELECT line_id, payroll_id, component_code, name, kind, amount
            FROM payroll_lines
            WHERE payroll_id = $1
            ORDER BY component_code
            "#,
        )
        .bind(payroll_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to fetch payroll lines", e))
    }

    #[instrument(skip(self, draft, finalize), fields(payroll_id = %draft.payroll.payroll_id, employee_id = %draft.payroll.employee_id))]
    async fn insert_payroll(
        &self,
        draft: &PayrollDraft,
        finalize: Option<Finalize>,
    ) -> Result<PayrollCommit, GatewayError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_payroll"])
            .start_timer();

        let payroll = &draft.payroll;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("Failed to begin transaction", e))?;
        self.set_lock_timeout(&mut tx).await?;

        let inserted = sqlx::query_as::<_, Payroll>(&format!(
            r#"
            INSERT INTO payrolls ({PAYROLL_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29)
            RETURNING {PAYROLL_COLUMNS}
            "#
        ))
        .bind(payroll.payroll_id)
        .bind(payroll.employee_id)
        .bind(payroll.month)
        .bind(payroll.contract_id)
        .bind(payroll.basic)
        .bind(payroll.allowances)
        .bind(payroll.overtime)
        .bind(payroll.bonus)
        .bind(payroll.insurance)
        .bind(payroll.tax)
        .bind(payroll.absence)
        .bind(payroll.late)
        .bind(payroll.advance_deduction)
        .bind(payroll.other_deductions)
        .bind(payroll.gross)
        .bind(payroll.total_additions)
        .bind(payroll.total_deductions)
        .bind(payroll.net)
        .bind(&payroll.status)
        .bind(&payroll.workflow)
        .bind(&payroll.payment_method)
        .bind(&payroll.payment_reference)
        .bind(payroll.journal_entry_id)
        .bind(payroll.settlement_entry_id)
        .bind(&payroll.approved_by)
        .bind(payroll.approved_utc)
        .bind(payroll.paid_utc)
        .bind(&payroll.created_by)
        .bind(payroll.created_utc)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                GatewayError::Validation(anyhow::anyhow!(
                    "Payroll already exists for employee {} and month {}",
                    payroll.employee_id,
                    payroll.month
                ))
            }
            _ => map_db_err("Failed to insert payroll", e),
        })?;

        for line in &draft.lines {
            sqlx::query(
                r#"
                INSERT INTO payroll_lines (line_id, payroll_id, component_code, name, kind, amount)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(payroll.payroll_id)
            .bind(&line.component_code)
            .bind(&line.name)
            .bind(line.kind.as_str())
            .bind(line.amount)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("Failed to insert payroll line", e))?;
        }

        let mut created = Vec::with_capacity(draft.installments.len());
        for staged in &draft.installments {
            let advance = sqlx::query_as::<_, Advance>(&format!(
                "SELECT {ADVANCE_COLUMNS} FROM advances WHERE advance_id = $1 FOR UPDATE"
            ))
            .bind(staged.advance_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_db_err("Failed to lock advance", e))?
            .ok_or_else(|| {
                GatewayError::Validation(anyhow::anyhow!("Advance {} not found", staged.advance_id))
            })?;

            // At-most-once per (advance, month), re-checked under the lock.
            let exists: Option<i32> = sqlx::query_scalar(
                "SELECT 1 FROM advance_installments WHERE advance_id = $1 AND month = $2",
            )
            .bind(staged.advance_id)
            .bind(payroll.month)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_db_err("Failed to check installment", e))?;
            if exists.is_some() {
                continue;
            }

            let installment = sqlx::query_as::<_, AdvanceInstallment>(
                r#"
                INSERT INTO advance_installments
                    (installment_id, advance_id, payroll_id, month, amount, installment_number, created_utc)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING installment_id, advance_id, payroll_id, month, amount, installment_number, created_utc
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(staged.advance_id)
            .bind(payroll.payroll_id)
            .bind(payroll.month)
            .bind(staged.amount)
            .bind(staged.installment_number)
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    GatewayError::Conflict(anyhow::anyhow!(
                        "Installment already recorded for advance {} and month {}",
                        staged.advance_id,
                        payroll.month
                    ))
                }
                _ => map_db_err("Failed to insert installment", e),
            })?;

            let paid = advance.paid_installments + 1;
            let remaining = advance.balance_after(paid);
            let status = if remaining.is_zero() {
                AdvanceStatus::Completed
            } else {
                AdvanceStatus::InProgress
            };
            sqlx::query(
                "UPDATE advances SET paid_installments = $2, remaining_amount = $3, status = $4 WHERE advance_id = $1",
            )
            .bind(staged.advance_id)
            .bind(paid)
            .bind(remaining)
            .bind(status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("Failed to update advance", e))?;

            created.push(installment);
        }

        if let Some(finalize) = &finalize {
            apply_finalize(&mut tx, finalize).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_db_err("Failed to commit transaction", e))?;

        timer.observe_duration();

        info!(
            payroll_id = %inserted.payroll_id,
            employee_id = %inserted.employee_id,
            month = %inserted.month,
            net = %inserted.net,
            installments = created.len(),
            "Payroll persisted"
        );

        Ok(PayrollCommit {
            payroll: inserted,
            installments: created,
        })
    }

    #[instrument(skip(self, transition, finalize), fields(payroll_id = %payroll_id))]
    async fn transition_payroll(
        &self,
        payroll_id: Uuid,
        expected: PayrollStatus,
        transition: PayrollTransition,
        finalize: Option<Finalize>,
    ) -> Result<Payroll, GatewayError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["transition_payroll"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("Failed to begin transaction", e))?;
        self.set_lock_timeout(&mut tx).await?;

        let current = sqlx::query_as::<_, Payroll>(&format!(
            "SELECT {PAYROLL_COLUMNS} FROM payrolls WHERE payroll_id = $1 FOR UPDATE"
        ))
        .bind(payroll_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_db_err("Failed to lock payroll", e))?
        .ok_or_else(|| GatewayError::NotFound(anyhow::anyhow!("Payroll {} not found", payroll_id)))?;

        if current.status != expected.as_str() {
            return Err(GatewayError::Validation(anyhow::anyhow!(
                "Payroll {} is '{}', expected '{}'",
                payroll_id,
                current.status,
                expected.as_str()
            )));
        }

        let now = Utc::now();
        let updated = match &transition {
            PayrollTransition::Approve { approved_by } => {
                sqlx::query_as::<_, Payroll>(&format!(
                    r#"
                    UPDATE payrolls
                    SET status = 'approved', approved_by = $2, approved_utc = $3
                    WHERE payroll_id = $1
                    RETURNING {PAYROLL_COLUMNS}
                    "#
                ))
                .bind(payroll_id)
                .bind(approved_by)
                .bind(now)
                .fetch_one(&mut *tx)
                .await
            }
            PayrollTransition::Pay {
                payment_method,
                payment_reference,
                settlement_entry_id,
            } => {
                sqlx::query_as::<_, Payroll>(&format!(
                    r#"
                    UPDATE payrolls
                    SET status = 'paid', payment_method = $2, payment_reference = $3,
                        settlement_entry_id = $4, paid_utc = $5
                    WHERE payroll_id = $1
                    RETURNING {PAYROLL_COLUMNS}
                    "#
                ))
                .bind(payroll_id)
                .bind(payment_method)
                .bind(payment_reference)
                .bind(settlement_entry_id)
                .bind(now)
                .fetch_one(&mut *tx)
                .await
            }
            PayrollTransition::Cancel => {
                sqlx::query_as::<_, Payroll>(&format!(
                    "UPDATE payrolls SET status = 'cancelled' WHERE payroll_id = $1 RETURNING {PAYROLL_COLUMNS}"
                ))
                .bind(payroll_id)
                .fetch_one(&mut *tx)
                .await
            }
        }
        .map_err(|e| map_db_err("Failed to transition payroll", e))?;

        if let Some(finalize) = &finalize {
            apply_finalize(&mut tx, finalize).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_db_err("Failed to commit transaction", e))?;

        timer.observe_duration();

        info!(
            payroll_id = %updated.payroll_id,
            status = %updated.status,
            "Payroll status transitioned"
        );

        Ok(updated)
    }

    async fn link_journal_entry(
        &self,
        payroll_id: Uuid,
        entry_id: Uuid,
    ) -> Result<(), GatewayError> {
        sqlx::query("UPDATE payrolls SET journal_entry_id = $2 WHERE payroll_id = $1")
            .bind(payroll_id)
            .bind(entry_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("Failed to link journal entry", e))?;
        Ok(())
    }
}

/// Complete the governing idempotency record inside the business
/// transaction so the key commits together with its result.
async fn apply_finalize(
    tx: &mut Transaction<'_, Postgres>,
    finalize: &Finalize,
) -> Result<(), GatewayError> {
    sqlx::query(
        "UPDATE idempotency_records SET status = 'completed', result_data = $2 WHERE record_id = $1",
    )
    .bind(finalize.record_id)
    .bind(&finalize.result)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_db_err("Failed to finalize idempotency", e))?;
    Ok(())
}
