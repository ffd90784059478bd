//! Employee cash advances and their installment schedule.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvanceStatus {
    Pending,
    Approved,
    Paid,
    InProgress,
    Completed,
    Cancelled,
}

impl AdvanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Paid => "paid",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "paid" => Some(Self::Paid),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Employee cash advance.
///
/// Invariant maintained by the payroll store:
/// `remaining_amount == max(0, amount - paid_installments * installment_amount)`,
/// with status `completed` exactly when the balance reaches zero.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Advance {
    pub advance_id: Uuid,
    pub employee_id: Uuid,
    pub amount: Decimal,
    pub installment_count: i32,
    pub installment_amount: Decimal,
    pub remaining_amount: Decimal,
    pub paid_installments: i32,
    pub deduction_start_month: NaiveDate,
    pub status: String,
    pub created_utc: DateTime<Utc>,
}

impl Advance {
    pub fn parsed_status(&self) -> Option<AdvanceStatus> {
        AdvanceStatus::from_str(&self.status)
    }

    /// Whether this advance takes a deduction in the given month
    /// (disbursed, balance outstanding, schedule started).
    pub fn deductible_for(&self, month: NaiveDate) -> bool {
        matches!(
            self.parsed_status(),
            Some(AdvanceStatus::Paid) | Some(AdvanceStatus::InProgress)
        ) && self.remaining_amount > Decimal::ZERO
            && self.deduction_start_month <= month
    }

    /// The next installment: the fixed amount, capped by the remaining
    /// balance.
    pub fn next_installment_amount(&self) -> Decimal {
        self.installment_amount.min(self.remaining_amount)
    }

    /// Balance after `paid` installments, clamped at zero.
    pub fn balance_after(&self, paid: i32) -> Decimal {
        (self.amount - self.installment_amount * Decimal::from(paid)).max(Decimal::ZERO)
    }
}

/// One scheduled partial repayment, at most one per (advance, month).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AdvanceInstallment {
    pub installment_id: Uuid,
    pub advance_id: Uuid,
    pub payroll_id: Uuid,
    pub month: NaiveDate,
    pub amount: Decimal,
    pub installment_number: i32,
    pub created_utc: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advance(amount: i64, count: i32, per: i64, paid: i32, status: AdvanceStatus) -> Advance {
        let amount = Decimal::from(amount);
        let installment_amount = Decimal::from(per);
        Advance {
            advance_id: Uuid::new_v4(),
            employee_id: Uuid::new_v4(),
            amount,
            installment_count: count,
            installment_amount,
            remaining_amount: (amount - installment_amount * Decimal::from(paid))
                .max(Decimal::ZERO),
            paid_installments: paid,
            deduction_start_month: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            status: status.as_str().to_string(),
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn only_disbursed_advances_with_balance_are_deductible() {
        let month = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        assert!(advance(3000, 3, 1000, 0, AdvanceStatus::Paid).deductible_for(month));
        assert!(advance(3000, 3, 1000, 1, AdvanceStatus::InProgress).deductible_for(month));
        assert!(!advance(3000, 3, 1000, 3, AdvanceStatus::Completed).deductible_for(month));
        assert!(!advance(3000, 3, 1000, 0, AdvanceStatus::Pending).deductible_for(month));
    }

    #[test]
    fn schedule_start_gates_deduction() {
        let advance = advance(3000, 3, 1000, 0, AdvanceStatus::Paid);
        assert!(!advance.deductible_for(NaiveDate::from_ymd_opt(2023, 12, 1).unwrap()));
        assert!(advance.deductible_for(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
    }

    #[test]
    fn final_installment_is_capped_by_balance() {
        // 2500 over 3 installments of 1000: the last one is 500.
        let advance = advance(2500, 3, 1000, 2, AdvanceStatus::InProgress);
        assert_eq!(advance.remaining_amount, Decimal::from(500));
        assert_eq!(advance.next_installment_amount(), Decimal::from(500));
        assert_eq!(advance.balance_after(3), Decimal::ZERO);
    }
}
