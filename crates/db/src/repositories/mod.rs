//! Repository implementations of the core storage seams.

mod audit;
mod ledger;
mod mapping;

pub use ledger::PgLedgerStore;
