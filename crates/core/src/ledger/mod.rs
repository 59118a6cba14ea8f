//! Coin ledger.
//!
//! This module implements the Account Store:
//! - Domain types for accounts, transactions and lots
//! - Pure posting rules (FIFO lot consumption, expiry, notices)
//! - The storage seam and an in-memory backend
//! - The account service, lazy history and conflict retries

pub mod balance;
pub mod error;
pub mod history;
pub mod memory;
pub mod retry;
pub mod service;
pub mod store;
pub mod types;

#[cfg(test)]
mod service_props;

pub use error::LedgerError;
pub use history::History;
pub use memory::InMemoryLedgerStore;
pub use retry::{retry_stale, RetryPolicy};
pub use service::{AccountStore, LotExpiry};
pub use store::{AccountWrite, LedgerBatch, LedgerResult, LedgerStore};
pub use types::{
    Account, AccountKey, AccountSnapshot, HistoryRange, Lot, LotAllocation, LotState,
    Transaction, TransactionKind,
};
