//! Core business logic for Moeda.
//!
//! This crate contains the coin ledger and its rules with ZERO web or
//! database dependencies. Storage is reached through the
//! [`ledger::LedgerStore`] trait; an in-memory backend lives here, the
//! PostgreSQL one in `moeda-db`.
//!
//! # Modules
//!
//! - `ledger` - Account Store: balances, lots and the transaction log
//! - `policy` - Distribution rules, expiration and transfer policies
//! - `rules` - Distribution Rules Engine
//! - `expiration` - Expiration Manager
//! - `transfer` - Transfer Broker
//! - `admin` - Admin Override & Audit
//! - `notify` - Notification events and the side-effect outbox

pub mod admin;
pub mod audit;
pub mod clock;
pub mod expiration;
pub mod ledger;
pub mod notify;
pub mod policy;
pub mod rules;
pub mod services;
pub mod transfer;

pub use services::LedgerServices;
