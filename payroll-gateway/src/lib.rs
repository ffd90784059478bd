//! Payroll Gateway - the governed payroll orchestrator.
//!
//! Composes salary calculation, advance-deduction coordination, payroll
//! persistence and ledger posting into one idempotent workflow, and owns
//! the payroll approval and payment state transitions.

pub mod models;
pub mod services;
pub mod store;
