//! Employee and contract reference data.

use super::{month_end, month_start};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Employee {
    pub employee_id: Uuid,
    pub staff_code: String,
    pub full_name: String,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
}

/// Employment contract carrying the basic salary percentage components
/// are computed against.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Contract {
    pub contract_id: Uuid,
    pub employee_id: Uuid,
    pub basic_salary: Decimal,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub active: bool,
}

impl Contract {
    /// Whether this contract covers any part of the given pay month.
    pub fn covers(&self, month: NaiveDate) -> bool {
        let start = month_start(month);
        let end = month_end(month);
        self.start_date <= end && self.end_date.map_or(true, |until| until >= start)
    }
}
