//! `SeaORM` entities for the ledger tables.

pub mod accounts;
pub mod audit_log;
pub mod award_outcomes;
pub mod ledger_transactions;
pub mod lots;
