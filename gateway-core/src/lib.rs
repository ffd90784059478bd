//! gateway-core: Shared infrastructure for the governed transaction gateway.
//!
//! Everything the owning gateways (ledger, payroll) have in common lives
//! here: the error taxonomy, configuration, structured logging, the
//! authority (capability) table, the in-process lock registry, the
//! idempotency store, the audit trail and signal governance.

pub mod audit;
pub mod authority;
pub mod config;
pub mod db;
pub mod error;
pub mod governance;
pub mod idempotency;
pub mod lock;
pub mod observability;

pub use error::GatewayError;
