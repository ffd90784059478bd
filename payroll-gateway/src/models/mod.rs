pub mod advance;
pub mod component;
pub mod employee;
pub mod payroll;

pub use advance::{Advance, AdvanceInstallment, AdvanceStatus};
pub use component::{
    CalculationMethod, ComponentKind, DeductionKind, EarningKind, SalaryComponent,
};
pub use employee::{Contract, Employee};
pub use payroll::{Payroll, PayrollLine, PayrollStatus};

use chrono::{Datelike, NaiveDate};

/// Normalize a date to the first day of its month (the canonical pay
/// month key).
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Last day of the month containing `date`.
pub fn month_end(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|next| next.pred_opt())
        .unwrap_or(date)
}
