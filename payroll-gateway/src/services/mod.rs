pub mod calculator;
pub mod metrics;
pub mod orchestrator;
pub mod posting;

pub use calculator::{RuleSet, SalaryRule};
pub use orchestrator::{
    AdvanceEvents, ApprovePayroll, CancelPayroll, CreatePayroll, NoopAdvanceEvents,
    PayrollGateway, ProcessPayment,
};
pub use posting::PayrollAccounts;
