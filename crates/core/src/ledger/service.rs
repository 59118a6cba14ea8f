//! Account Store service.
//!
//! The single entry point for mutating balances. Every operation reads a
//! snapshot, plans the movement with the pure functions in
//! [`super::balance`] and commits against the version it read. Conflicts
//! surface as `StaleVersion` for the caller to retry.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use moeda_shared::types::{LotId, StudentId, TransactionId};

use super::balance::{self, CreditSpec, DebitSpec, ExpiryPlan, LotSource};
use super::error::LedgerError;
use super::history::History;
use super::store::{AccountWrite, LedgerBatch, LedgerResult, LedgerStore};
use super::types::{AccountKey, AccountSnapshot, HistoryRange, Transaction, TransactionKind};
use crate::clock::Clock;
use crate::rules::{AwardRecord, CapExceededNotice};

const DEFAULT_HISTORY_PAGE_SIZE: u64 = 100;

/// Result of expiring one lot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LotExpiry {
    /// The lot expired; carries the expire transaction if coins were removed.
    Expired(Option<Transaction>),
    /// Nothing to do: already expired or consumed.
    AlreadySettled,
    /// The lot is not due yet.
    NotDue,
    /// An older live lot on the same account has to go first.
    Deferred,
}

/// Durable per-(student, discipline) balances and their transaction log.
#[derive(Debug, Clone)]
pub struct AccountStore {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    history_page_size: u64,
}

impl AccountStore {
    /// Creates an account store on top of a storage backend.
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
        }
    }

    /// Sets the page size used by [`History`].
    #[must_use]
    pub fn with_history_page_size(mut self, page_size: u64) -> Self {
        self.history_page_size = page_size.max(1);
        self
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Credits `amount` coins to the account.
    ///
    /// With `lot_duration` the coins form a new lot expiring
    /// `lot_duration` after now. Replaying an `origin_event_id` already
    /// recorded on the account returns the original transaction.
    pub async fn credit(
        &self,
        key: AccountKey,
        amount: i64,
        kind: TransactionKind,
        origin_event_id: &str,
        lot_duration: Option<Duration>,
    ) -> LedgerResult<Transaction> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if let Some(prior) = self.store.find_by_origin(key, origin_event_id).await? {
            debug!(account = %key, origin_event_id, "Replaying credit");
            return same_movement(prior, kind, amount);
        }

        let now = self.clock.now();
        let snapshot = self.snapshot_or_empty(key, now).await?;
        let lots = lot_duration.map_or(LotSource::None, |duration| LotSource::Fresh {
            expires_at: now + duration,
        });
        let write = balance::post_credit(
            &snapshot,
            CreditSpec {
                amount,
                kind,
                origin_event_id: origin_event_id.to_string(),
                lots,
                reverses: None,
            },
            now,
        )?;

        let tx = self.commit_single(write).await?;
        info!(account = %key, amount, kind = %kind, tx_id = %tx.id, "Credited account");
        Ok(tx)
    }

    /// Credits an earned award and records its outcome in the same commit.
    /// With nothing granted only the outcome is stored.
    pub(crate) async fn record_award(
        &self,
        key: AccountKey,
        granted: i64,
        origin_event_id: &str,
        lot_duration: Option<Duration>,
        cap_notice: Option<CapExceededNotice>,
    ) -> LedgerResult<(Option<Transaction>, AwardRecord)> {
        if granted < 0 {
            return Err(LedgerError::InvalidAmount(granted));
        }
        let now = self.clock.now();
        let write = if granted > 0 {
            let snapshot = self.snapshot_or_empty(key, now).await?;
            let lots = lot_duration.map_or(LotSource::None, |duration| LotSource::Fresh {
                expires_at: now + duration,
            });
            Some(balance::post_credit(
                &snapshot,
                CreditSpec {
                    amount: granted,
                    kind: TransactionKind::Earn,
                    origin_event_id: origin_event_id.to_string(),
                    lots,
                    reverses: None,
                },
                now,
            )?)
        } else {
            None
        };

        let transaction = write.as_ref().and_then(|write| write.transaction.clone());
        let record = AwardRecord {
            account: key,
            origin_event_id: origin_event_id.to_string(),
            transaction_id: transaction.as_ref().map(|tx| tx.id),
            cap_notice,
            recorded_at: now,
        };
        let batch = write
            .map_or_else(LedgerBatch::default, LedgerBatch::single)
            .with_award(record.clone());
        self.store.commit(batch).await?;

        info!(account = %key, granted, origin_event_id, "Recorded award");
        Ok((transaction, record))
    }

    /// Debits `amount` coins, consuming lots oldest first.
    pub async fn debit(
        &self,
        key: AccountKey,
        amount: i64,
        kind: TransactionKind,
        origin_event_id: &str,
    ) -> LedgerResult<Transaction> {
        self.debit_with(key, amount, kind, origin_event_id, false).await
    }

    /// Debits; with `allow_negative` this one debit may take the balance
    /// below zero.
    pub(crate) async fn debit_with(
        &self,
        key: AccountKey,
        amount: i64,
        kind: TransactionKind,
        origin_event_id: &str,
        allow_negative: bool,
    ) -> LedgerResult<Transaction> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if let Some(prior) = self.store.find_by_origin(key, origin_event_id).await? {
            debug!(account = %key, origin_event_id, "Replaying debit");
            return same_movement(prior, kind, -amount);
        }

        let now = self.clock.now();
        let snapshot = self.snapshot_or_empty(key, now).await?;
        let write = balance::post_debit(
            &snapshot,
            DebitSpec {
                amount,
                kind,
                origin_event_id: origin_event_id.to_string(),
                allow_negative,
            },
            now,
        )?;

        let tx = self.commit_single(write).await?;
        info!(account = %key, amount, kind = %kind, tx_id = %tx.id, "Debited account");
        Ok(tx)
    }

    /// Credits back a cancelled transaction, re-creating the lots it
    /// consumed with their original dates.
    ///
    /// Unlike [`Self::credit`] a repeated restore is not replayed: it fails
    /// with `DuplicateEvent` so the caller can tell it lost.
    pub(crate) async fn restore(
        &self,
        original: &Transaction,
        origin_event_id: &str,
    ) -> LedgerResult<Transaction> {
        let key = original.account;
        let now = self.clock.now();
        let snapshot = self.snapshot_or_empty(key, now).await?;
        let write = balance::post_credit(
            &snapshot,
            CreditSpec {
                amount: -original.amount,
                kind: TransactionKind::Adjust,
                origin_event_id: origin_event_id.to_string(),
                lots: LotSource::Inherited(original.allocations.clone()),
                reverses: Some(original.id),
            },
            now,
        )?;
        let tx = write
            .transaction
            .clone()
            .ok_or_else(|| LedgerError::Storage("restore without transaction".to_string()))?;
        self.store.commit(LedgerBatch::single(write)).await?;
        info!(account = %key, amount = tx.amount, reverses = %original.id, "Restored cancelled transaction");
        Ok(tx)
    }

    /// Balance of the account; unknown accounts hold zero.
    pub async fn balance(&self, key: AccountKey) -> LedgerResult<i64> {
        Ok(self
            .store
            .snapshot(key)
            .await?
            .map_or(0, |snapshot| snapshot.account.balance))
    }

    /// Account state with its live lots.
    pub async fn account(&self, key: AccountKey) -> LedgerResult<AccountSnapshot> {
        self.store
            .snapshot(key)
            .await?
            .ok_or(LedgerError::AccountNotFound(key))
    }

    /// Sum of balances over all of the student's discipline accounts.
    pub async fn pooled_balance(&self, student_id: StudentId) -> LedgerResult<i64> {
        Ok(self
            .store
            .accounts_for_student(student_id)
            .await?
            .iter()
            .map(|account| account.balance)
            .sum())
    }

    /// History of the account inside `range`, fetched lazily.
    pub fn history(&self, key: AccountKey, range: HistoryRange) -> History {
        History::new(Arc::clone(&self.store), key, range, self.history_page_size)
    }

    /// Loads a transaction.
    pub async fn transaction(&self, id: TransactionId) -> LedgerResult<Transaction> {
        self.store
            .transaction(id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(id))
    }

    /// Finds the transaction recorded for an origin event on an account.
    pub async fn find_by_origin(
        &self,
        key: AccountKey,
        origin_event_id: &str,
    ) -> LedgerResult<Option<Transaction>> {
        self.store.find_by_origin(key, origin_event_id).await
    }

    /// Finds the award outcome recorded for an origin event on an account.
    pub(crate) async fn find_award(
        &self,
        key: AccountKey,
        origin_event_id: &str,
    ) -> LedgerResult<Option<AwardRecord>> {
        self.store.find_award(key, origin_event_id).await
    }

    /// Finds the compensating transaction of `id`, if it was cancelled.
    pub async fn reversal_of(&self, id: TransactionId) -> LedgerResult<Option<Transaction>> {
        self.store.reversal_of(id).await
    }

    /// Coins the student earned since `since`, across disciplines.
    pub async fn earned_since(
        &self,
        student_id: StudentId,
        since: DateTime<Utc>,
    ) -> LedgerResult<i64> {
        self.store.earned_since(student_id, since).await
    }

    /// Expires one lot as of `as_of`.
    pub async fn expire_lot(
        &self,
        key: AccountKey,
        lot_id: LotId,
        as_of: DateTime<Utc>,
    ) -> LedgerResult<LotExpiry> {
        let Some(snapshot) = self.store.snapshot(key).await? else {
            return Ok(LotExpiry::AlreadySettled);
        };
        match balance::post_expiry(&snapshot, lot_id, as_of) {
            ExpiryPlan::Expire(write) => {
                let tx = write.transaction.clone();
                self.store.commit(LedgerBatch::single(write)).await?;
                info!(account = %key, lot_id = %lot_id, "Expired lot");
                Ok(LotExpiry::Expired(tx))
            }
            ExpiryPlan::AlreadySettled => Ok(LotExpiry::AlreadySettled),
            ExpiryPlan::NotDue => Ok(LotExpiry::NotDue),
            ExpiryPlan::BlockedByOlderLot => Ok(LotExpiry::Deferred),
        }
    }

    /// Moves an active lot to `nearing_expiry`. Returns false if the lot was
    /// already noticed or is gone.
    pub async fn mark_nearing_expiry(&self, key: AccountKey, lot_id: LotId) -> LedgerResult<bool> {
        let Some(snapshot) = self.store.snapshot(key).await? else {
            return Ok(false);
        };
        let Some(write) = balance::post_notice(&snapshot, lot_id, self.clock.now()) else {
            return Ok(false);
        };
        self.store.commit(LedgerBatch::single(write)).await?;
        Ok(true)
    }

    pub(crate) async fn snapshot_or_empty(
        &self,
        key: AccountKey,
        now: DateTime<Utc>,
    ) -> LedgerResult<AccountSnapshot> {
        Ok(self
            .store
            .snapshot(key)
            .await?
            .unwrap_or_else(|| AccountSnapshot::empty(key, now)))
    }

    pub(crate) async fn accounts_for_student(
        &self,
        student_id: StudentId,
    ) -> LedgerResult<Vec<super::types::Account>> {
        self.store.accounts_for_student(student_id).await
    }

    pub(crate) async fn lots_expiring_by(
        &self,
        cutoff: DateTime<Utc>,
    ) -> LedgerResult<Vec<super::types::Lot>> {
        self.store.lots_expiring_by(cutoff).await
    }

    /// Commits a multi-account batch as one unit.
    pub(crate) async fn commit_batch(&self, batch: LedgerBatch) -> LedgerResult<()> {
        self.store.commit(batch).await
    }

    async fn commit_single(&self, write: AccountWrite) -> LedgerResult<Transaction> {
        let tx = write
            .transaction
            .clone()
            .ok_or_else(|| LedgerError::Storage("write carries no transaction".to_string()))?;
        match self.store.commit(LedgerBatch::single(write)).await {
            Ok(()) => Ok(tx),
            Err(LedgerError::DuplicateEvent {
                account,
                origin_event_id,
            }) => {
                debug!(account = %account, origin_event_id, "Lost race on origin event, replaying winner");
                let winner = self
                    .store
                    .find_by_origin(account, &origin_event_id)
                    .await?
                    .ok_or(LedgerError::DuplicateEvent {
                        account,
                        origin_event_id,
                    })?;
                same_movement(winner, tx.kind, tx.amount)
            }
            Err(err) => Err(err),
        }
    }
}

/// Accepts a recorded transaction as the replay of a request only if it
/// moved the same coins the same way.
fn same_movement(prior: Transaction, kind: TransactionKind, amount: i64) -> LedgerResult<Transaction> {
    if prior.kind == kind && prior.amount == amount {
        Ok(prior)
    } else {
        Err(LedgerError::DuplicateEvent {
            account: prior.account,
            origin_event_id: prior.origin_event_id,
        })
    }
}
