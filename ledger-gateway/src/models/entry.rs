//! Journal entry model for double-entry accounting.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Entry direction (debit or credit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }

    pub fn swapped(self) -> Self {
        match self {
            Self::Debit => Self::Credit,
            Self::Credit => Self::Debit,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Journal entry status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Draft,
    Posted,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Posted => "posted",
        }
    }
}

/// Entry types recorded on journal entries.
pub mod entry_types {
    pub const GENERAL: &str = "general";
    pub const PAYROLL_ACCRUAL: &str = "payroll_accrual";
    pub const PAYROLL_PAYMENT: &str = "payroll_payment";
    pub const REVERSAL: &str = "reversal";
}

/// Accounting period key ("YYYY-MM") for a posting date. Entry numbers
/// are gapless within one period.
pub fn period_of(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Posted journal entry header.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JournalEntry {
    pub entry_id: Uuid,
    pub entry_no: i64,
    pub period: String,
    pub source_module: String,
    pub source_model: String,
    pub source_id: String,
    pub entry_type: String,
    pub status: String,
    pub locked: bool,
    pub entry_date: NaiveDate,
    pub description: String,
    pub idempotency_key: String,
    pub reverses_entry_id: Option<Uuid>,
    pub created_by: String,
    pub created_utc: DateTime<Utc>,
}

impl JournalEntry {
    pub fn is_posted(&self) -> bool {
        self.status == EntryStatus::Posted.as_str()
    }
}

/// Single line of a journal entry.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JournalEntryLine {
    pub line_id: Uuid,
    pub entry_id: Uuid,
    pub line_no: i32,
    pub account_code: String,
    pub amount: Decimal,
    pub direction: String,
}

impl JournalEntryLine {
    /// Get parsed direction.
    pub fn parsed_direction(&self) -> Option<Direction> {
        match self.direction.as_str() {
            "debit" => Some(Direction::Debit),
            "credit" => Some(Direction::Credit),
            _ => None,
        }
    }

    /// Get signed amount (positive for debit, negative for credit).
    pub fn signed_amount(&self) -> Decimal {
        match self.parsed_direction() {
            Some(Direction::Debit) => self.amount,
            Some(Direction::Credit) => -self.amount,
            None => Decimal::ZERO,
        }
    }
}

/// Input line for posting. Exactly one side is populated by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalLine {
    pub account_code: String,
    pub amount: Decimal,
    pub direction: Direction,
}

impl JournalLine {
    pub fn debit(account_code: &str, amount: Decimal) -> Self {
        Self {
            account_code: account_code.to_string(),
            amount,
            direction: Direction::Debit,
        }
    }

    pub fn credit(account_code: &str, amount: Decimal) -> Self {
        Self {
            account_code: account_code.to_string(),
            amount,
            direction: Direction::Credit,
        }
    }

    /// The same posting with debit and credit sides swapped.
    pub fn swapped(&self) -> Self {
        Self {
            account_code: self.account_code.clone(),
            amount: self.amount,
            direction: self.direction.swapped(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_key_is_zero_padded() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(period_of(date), "2024-03");
    }

    #[test]
    fn swapped_line_flips_direction_only() {
        let line = JournalLine::debit("5110", Decimal::new(500000, 2));
        let swapped = line.swapped();
        assert_eq!(swapped.direction, Direction::Credit);
        assert_eq!(swapped.account_code, "5110");
        assert_eq!(swapped.amount, line.amount);
    }
}
