//! Payroll model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Payroll lifecycle. `cancelled` is a dead-end reachable only from
/// `calculated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayrollStatus {
    Calculated,
    Approved,
    Paid,
    Cancelled,
}

impl PayrollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calculated => "calculated",
            Self::Approved => "approved",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "calculated" => Some(Self::Calculated),
            "approved" => Some(Self::Approved),
            "paid" => Some(Self::Paid),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for PayrollStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One payroll for one employee and month (unique together).
///
/// Bucket fields hold cent-precision sums of their components; the
/// derived totals are rounded to whole currency units with `net` computed
/// from the rounded operands, so the stored identity
/// `net == gross + total_additions - total_deductions` is exact.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Payroll {
    pub payroll_id: Uuid,
    pub employee_id: Uuid,
    pub month: NaiveDate,
    pub contract_id: Uuid,

    pub basic: Decimal,
    pub allowances: Decimal,
    pub overtime: Decimal,
    pub bonus: Decimal,

    pub insurance: Decimal,
    pub tax: Decimal,
    pub absence: Decimal,
    pub late: Decimal,
    pub advance_deduction: Decimal,
    pub other_deductions: Decimal,

    pub gross: Decimal,
    pub total_additions: Decimal,
    pub total_deductions: Decimal,
    pub net: Decimal,

    pub status: String,
    pub workflow: String,
    pub payment_method: String,
    pub payment_reference: Option<String>,

    pub journal_entry_id: Option<Uuid>,
    pub settlement_entry_id: Option<Uuid>,

    pub approved_by: Option<String>,
    pub approved_utc: Option<DateTime<Utc>>,
    pub paid_utc: Option<DateTime<Utc>>,

    pub created_by: String,
    pub created_utc: DateTime<Utc>,
}

impl Payroll {
    pub fn parsed_status(&self) -> Option<PayrollStatus> {
        PayrollStatus::from_str(&self.status)
    }
}

/// One persisted line per non-zero component (plus the synthetic advance
/// recovery line).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PayrollLine {
    pub line_id: Uuid,
    pub payroll_id: Uuid,
    pub component_code: String,
    pub name: String,
    pub kind: String,
    pub amount: Decimal,
}
