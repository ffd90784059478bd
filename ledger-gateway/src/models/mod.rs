pub mod account;
pub mod entry;

pub use account::{AccountType, ChartAccount, NewAccount};
pub use entry::{
    entry_types, period_of, Direction, EntryStatus, JournalEntry, JournalEntryLine, JournalLine,
};
