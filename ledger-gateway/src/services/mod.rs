pub mod engine;
pub mod metrics;

pub use engine::{CreateAccountRequest, LedgerEngine, PostJournalEntry, ReverseEntry};
