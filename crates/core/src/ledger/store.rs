//! Storage seam for the ledger.
//!
//! Backends persist accounts, lots and the append-only transaction log.
//! Mutations arrive as [`LedgerBatch`]es that must commit atomically: either
//! every write lands or none does.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use moeda_shared::types::{StudentId, TransactionId};

use super::error::LedgerError;
use super::types::{Account, AccountKey, AccountSnapshot, HistoryRange, Lot, Transaction};
use crate::rules::AwardRecord;

/// Result alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// One account's share of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountWrite {
    /// Version read before planning; the commit fails if it moved.
    pub expected_version: i64,
    /// New account state.
    pub account: Account,
    /// Lots created or changed, stored as-is.
    pub lots: Vec<Lot>,
    /// Transaction to append, if the write moves coins.
    pub transaction: Option<Transaction>,
}

/// Writes that commit together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerBatch {
    /// At most one write per account.
    pub writes: Vec<AccountWrite>,
    /// Award outcomes recorded with the writes, one per origin event.
    pub awards: Vec<AwardRecord>,
}

impl LedgerBatch {
    /// A batch touching a single account.
    #[must_use]
    pub fn single(write: AccountWrite) -> Self {
        Self {
            writes: vec![write],
            awards: Vec::new(),
        }
    }

    /// Adds a write.
    #[must_use]
    pub fn with(mut self, write: AccountWrite) -> Self {
        self.writes.push(write);
        self
    }

    /// Records an award outcome.
    #[must_use]
    pub fn with_award(mut self, award: AwardRecord) -> Self {
        self.awards.push(award);
        self
    }

    /// Transactions appended by the batch, in write order.
    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.writes.iter().filter_map(|write| write.transaction.as_ref())
    }
}

/// Persistence backend for the ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync + fmt::Debug {
    /// Loads an account with its live lots, or `None` if never written.
    async fn snapshot(&self, key: AccountKey) -> LedgerResult<Option<AccountSnapshot>>;

    /// Finds the transaction recorded for `origin_event_id` on the account.
    async fn find_by_origin(
        &self,
        key: AccountKey,
        origin_event_id: &str,
    ) -> LedgerResult<Option<Transaction>>;

    /// Finds the award outcome recorded for `origin_event_id` on the account.
    async fn find_award(
        &self,
        key: AccountKey,
        origin_event_id: &str,
    ) -> LedgerResult<Option<AwardRecord>>;

    /// Loads a transaction by id.
    async fn transaction(&self, id: TransactionId) -> LedgerResult<Option<Transaction>>;

    /// Finds the transaction that reverses `id`, if any.
    async fn reversal_of(&self, id: TransactionId) -> LedgerResult<Option<Transaction>>;

    /// Commits a batch atomically.
    ///
    /// Fails with `StaleVersion` if any account moved past its expected
    /// version and with `DuplicateEvent` if an origin event, a reversal or
    /// an award outcome is already recorded. Nothing is written on failure.
    async fn commit(&self, batch: LedgerBatch) -> LedgerResult<()>;

    /// Returns up to `limit` transactions with `account_version > after_version`
    /// inside `range`, ordered by version.
    async fn history_page(
        &self,
        key: AccountKey,
        range: HistoryRange,
        after_version: i64,
        limit: u64,
    ) -> LedgerResult<Vec<Transaction>>;

    /// Sum of the student's `earn` transactions created at or after `since`.
    async fn earned_since(&self, student_id: StudentId, since: DateTime<Utc>)
    -> LedgerResult<i64>;

    /// All written accounts of a student.
    async fn accounts_for_student(&self, student_id: StudentId) -> LedgerResult<Vec<Account>>;

    /// Live lots expiring at or before `cutoff`, oldest first.
    async fn lots_expiring_by(&self, cutoff: DateTime<Utc>) -> LedgerResult<Vec<Lot>>;
}
