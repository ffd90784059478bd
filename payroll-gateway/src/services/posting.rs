//! Ledger posting for payrolls.
//!
//! Maps each payroll bucket to a fixed chart-of-accounts code and builds
//! balanced journal lines. All lines carry the cent-precision bucket
//! amounts, with the net line computed from the same aggregates, so the
//! entry balances exactly by construction.

use crate::models::Payroll;
use gateway_core::GatewayError;
use ledger_gateway::models::JournalLine;
use rust_decimal::Decimal;

/// Fixed bucket-to-account mapping.
#[derive(Debug, Clone)]
pub struct PayrollAccounts {
    pub basic_expense: String,
    pub allowance_expense: String,
    pub overtime_expense: String,
    pub bonus_expense: String,
    pub insurance_payable: String,
    pub tax_payable: String,
    pub other_deductions_payable: String,
    pub advance_receivable: String,
    pub salaries_payable: String,
    pub employee_receivable: String,
}

impl Default for PayrollAccounts {
    fn default() -> Self {
        Self {
            basic_expense: "5110".to_string(),
            allowance_expense: "5120".to_string(),
            overtime_expense: "5130".to_string(),
            bonus_expense: "5140".to_string(),
            insurance_payable: "2130".to_string(),
            tax_payable: "2120".to_string(),
            other_deductions_payable: "2190".to_string(),
            advance_receivable: "1240".to_string(),
            salaries_payable: "2110".to_string(),
            employee_receivable: "1250".to_string(),
        }
    }
}

impl PayrollAccounts {
    /// Every account code the mapping touches.
    pub fn all_codes(&self) -> Vec<&str> {
        vec![
            &self.basic_expense,
            &self.allowance_expense,
            &self.overtime_expense,
            &self.bonus_expense,
            &self.insurance_payable,
            &self.tax_payable,
            &self.other_deductions_payable,
            &self.advance_receivable,
            &self.salaries_payable,
            &self.employee_receivable,
        ]
    }
}

/// Cent-precision net owed to the employee, from the stored buckets.
pub fn accrual_net_cents(payroll: &Payroll) -> Decimal {
    (payroll.basic + payroll.allowances + payroll.overtime + payroll.bonus)
        - (payroll.insurance
            + payroll.tax
            + payroll.absence
            + payroll.late
            + payroll.advance_deduction
            + payroll.other_deductions)
}

fn push_nonzero(lines: &mut Vec<JournalLine>, line: JournalLine) {
    if !line.amount.is_zero() {
        lines.push(line);
    }
}

/// Accrual entry: earnings debit expense accounts, deductions credit
/// payable/receivable accounts, net credits salaries payable (or debits a
/// receivable when net is negative).
pub fn accrual_lines(payroll: &Payroll, accounts: &PayrollAccounts) -> Vec<JournalLine> {
    let mut lines = Vec::new();

    push_nonzero(
        &mut lines,
        JournalLine::debit(&accounts.basic_expense, payroll.basic),
    );
    push_nonzero(
        &mut lines,
        JournalLine::debit(&accounts.allowance_expense, payroll.allowances),
    );
    push_nonzero(
        &mut lines,
        JournalLine::debit(&accounts.overtime_expense, payroll.overtime),
    );
    push_nonzero(
        &mut lines,
        JournalLine::debit(&accounts.bonus_expense, payroll.bonus),
    );

    push_nonzero(
        &mut lines,
        JournalLine::credit(&accounts.insurance_payable, payroll.insurance),
    );
    push_nonzero(
        &mut lines,
        JournalLine::credit(&accounts.tax_payable, payroll.tax),
    );
    push_nonzero(
        &mut lines,
        JournalLine::credit(
            &accounts.other_deductions_payable,
            payroll.absence + payroll.late + payroll.other_deductions,
        ),
    );
    push_nonzero(
        &mut lines,
        JournalLine::credit(&accounts.advance_receivable, payroll.advance_deduction),
    );

    let net = accrual_net_cents(payroll);
    if net > Decimal::ZERO {
        lines.push(JournalLine::credit(&accounts.salaries_payable, net));
    } else if net < Decimal::ZERO {
        lines.push(JournalLine::debit(&accounts.employee_receivable, -net));
    }

    lines
}

/// Settlement entry for payment: clear the salaries-payable liability
/// against the chosen cash/bank account.
pub fn settlement_lines(
    payroll: &Payroll,
    accounts: &PayrollAccounts,
    settlement_account: &str,
) -> Result<Vec<JournalLine>, GatewayError> {
    let net = accrual_net_cents(payroll);
    if net <= Decimal::ZERO {
        return Err(GatewayError::Validation(anyhow::anyhow!(
            "Payroll {} has non-positive net {}; nothing to settle",
            payroll.payroll_id,
            net
        )));
    }
    Ok(vec![
        JournalLine::debit(&accounts.salaries_payable, net),
        JournalLine::credit(settlement_account, net),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use ledger_gateway::models::Direction;
    use uuid::Uuid;

    fn payroll(basic: i64, allowances: i64, insurance: i64, advance: i64) -> Payroll {
        let basic = Decimal::from(basic);
        let allowances = Decimal::from(allowances);
        let insurance = Decimal::from(insurance);
        let advance = Decimal::from(advance);
        Payroll {
            payroll_id: Uuid::new_v4(),
            employee_id: Uuid::new_v4(),
            month: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            contract_id: Uuid::new_v4(),
            basic,
            allowances,
            overtime: Decimal::ZERO,
            bonus: Decimal::ZERO,
            insurance,
            tax: Decimal::ZERO,
            absence: Decimal::ZERO,
            late: Decimal::ZERO,
            advance_deduction: advance,
            other_deductions: Decimal::ZERO,
            gross: basic + allowances,
            total_additions: Decimal::ZERO,
            total_deductions: insurance + advance,
            net: basic + allowances - insurance - advance,
            status: "calculated".to_string(),
            workflow: "monthly".to_string(),
            payment_method: "bank".to_string(),
            payment_reference: None,
            journal_entry_id: None,
            settlement_entry_id: None,
            approved_by: None,
            approved_utc: None,
            paid_utc: None,
            created_by: "tester".to_string(),
            created_utc: Utc::now(),
        }
    }

    fn sums(lines: &[JournalLine]) -> (Decimal, Decimal) {
        lines.iter().fold(
            (Decimal::ZERO, Decimal::ZERO),
            |(debits, credits), line| match line.direction {
                Direction::Debit => (debits + line.amount, credits),
                Direction::Credit => (debits, credits + line.amount),
            },
        )
    }

    #[test]
    fn accrual_balances_by_construction() {
        let lines = accrual_lines(&payroll(5000, 1000, 550, 1000), &PayrollAccounts::default());
        let (debits, credits) = sums(&lines);
        assert_eq!(debits, credits);
        // No zero-amount lines are emitted.
        assert!(lines.iter().all(|l| !l.amount.is_zero()));
    }

    #[test]
    fn negative_net_debits_the_employee_receivable() {
        let accounts = PayrollAccounts::default();
        let lines = accrual_lines(&payroll(1000, 0, 1500, 0), &accounts);
        let (debits, credits) = sums(&lines);
        assert_eq!(debits, credits);
        assert!(lines
            .iter()
            .any(|l| l.account_code == accounts.employee_receivable
                && l.direction == Direction::Debit
                && l.amount == Decimal::from(500)));
    }

    #[test]
    fn settlement_clears_the_liability() {
        let accounts = PayrollAccounts::default();
        let lines = settlement_lines(&payroll(5000, 1000, 550, 0), &accounts, "1010").unwrap();
        let (debits, credits) = sums(&lines);
        assert_eq!(debits, credits);
        assert_eq!(debits, Decimal::from(5450));
        assert_eq!(lines[0].account_code, accounts.salaries_payable);
        assert_eq!(lines[1].account_code, "1010");
    }

    #[test]
    fn settling_a_non_positive_net_is_rejected() {
        let err = settlement_lines(
            &payroll(1000, 0, 1500, 0),
            &PayrollAccounts::default(),
            "1010",
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }
}
