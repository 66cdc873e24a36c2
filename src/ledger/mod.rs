//! Company balance ledger.
//!
//! Every balance change is an append-only [`LedgerEntry`]; `companies.balance`
//! is a projection written in the same transaction as the entry.

pub mod api;
pub mod models;
pub mod store;

pub use models::{ApplyOutcome, EntryType, LedgerEntry, LedgerPage, NewLedgerEntry};
pub use store::{LedgerError, LedgerStore};
