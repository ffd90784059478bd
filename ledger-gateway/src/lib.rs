//! Ledger Gateway - the single writer of journal entries.
//!
//! Validates double-entry balance, applies idempotency, assigns gapless
//! per-period entry numbers and posts to the general ledger. Posted
//! entries are locked; the only way to neutralize one is a reversing
//! entry.

pub mod models;
pub mod services;
pub mod store;
