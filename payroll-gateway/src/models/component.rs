//! Salary component definitions and bucket routing.
//!
//! Components are routed into payroll buckets once, at load time, via the
//! `EarningKind`/`DeductionKind` enums; the calculation never branches on
//! raw code strings.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Whether a component adds to or subtracts from pay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Earning,
    Deduction,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earning => "earning",
            Self::Deduction => "deduction",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "earning" => Some(Self::Earning),
            "deduction" => Some(Self::Deduction),
            _ => None,
        }
    }
}

/// How a component's amount is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculationMethod {
    /// Verbatim amount.
    Fixed,
    /// Percentage of the contract basic salary, rounded to cents.
    Percentage,
    /// Pluggable business rule registered by component code.
    Formula,
}

impl CalculationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Percentage => "percentage",
            Self::Formula => "formula",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "fixed" => Some(Self::Fixed),
            "percentage" => Some(Self::Percentage),
            "formula" => Some(Self::Formula),
            _ => None,
        }
    }
}

/// Earning buckets on a payroll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarningKind {
    Basic,
    Allowance,
    Overtime,
    Bonus,
}

impl EarningKind {
    pub fn from_code(code: &str) -> Self {
        match code {
            "BASIC_SALARY" => Self::Basic,
            "OVERTIME" => Self::Overtime,
            "BONUS" | "COMMISSION" => Self::Bonus,
            _ => Self::Allowance,
        }
    }
}

/// Deduction buckets on a payroll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeductionKind {
    Insurance,
    Tax,
    Absence,
    Late,
    /// Advance recovery; produced by advance coordination, not by salary
    /// components.
    Advance,
    Other,
}

impl DeductionKind {
    pub fn from_code(code: &str) -> Self {
        match code {
            "SOCIAL_INSURANCE" | "HEALTH_INSURANCE" | "PENSION" => Self::Insurance,
            "INCOME_TAX" | "PAYE" => Self::Tax,
            "ABSENCE" => Self::Absence,
            "LATE" => Self::Late,
            "ADVANCE_RECOVERY" => Self::Advance,
            _ => Self::Other,
        }
    }
}

/// Component code reserved for the synthetic advance-recovery payroll line.
pub const ADVANCE_RECOVERY_CODE: &str = "ADVANCE_RECOVERY";

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SalaryComponent {
    pub component_id: Uuid,
    pub code: String,
    pub name: String,
    pub kind: String,
    pub method: String,
    /// Fixed amount, or percentage when `method` is `percentage`.
    pub amount: Decimal,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
    pub active: bool,
}

impl SalaryComponent {
    pub fn parsed_kind(&self) -> Option<ComponentKind> {
        ComponentKind::from_str(&self.kind)
    }

    pub fn parsed_method(&self) -> Option<CalculationMethod> {
        CalculationMethod::from_str(&self.method)
    }

    pub fn effective_for(&self, month: NaiveDate) -> bool {
        self.active
            && self.effective_from <= month
            && self.effective_to.map_or(true, |until| until >= month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_route_to_buckets_once() {
        assert_eq!(EarningKind::from_code("BASIC_SALARY"), EarningKind::Basic);
        assert_eq!(EarningKind::from_code("HOUSING"), EarningKind::Allowance);
        assert_eq!(EarningKind::from_code("TRANSPORT"), EarningKind::Allowance);
        assert_eq!(EarningKind::from_code("OVERTIME"), EarningKind::Overtime);
        assert_eq!(
            DeductionKind::from_code("SOCIAL_INSURANCE"),
            DeductionKind::Insurance
        );
        assert_eq!(DeductionKind::from_code("INCOME_TAX"), DeductionKind::Tax);
        assert_eq!(DeductionKind::from_code("UNION_FEE"), DeductionKind::Other);
    }
}
