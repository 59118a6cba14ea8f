//! In-memory ledger backend.
//!
//! Each account lives behind its own mutex; a batch locks only the accounts
//! it touches, always in key order, so unrelated accounts never contend and
//! multi-account batches cannot deadlock.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use moeda_shared::types::{AuditEntryId, LotId, StudentId, TransactionId};

use super::error::LedgerError;
use super::store::{LedgerBatch, LedgerResult, LedgerStore};
use super::types::{
    Account, AccountKey, AccountSnapshot, HistoryRange, Lot, Transaction, TransactionKind,
};
use crate::audit::{AuditLog, AuditLogEntry};
use crate::rules::AwardRecord;

#[derive(Debug)]
struct AccountRecord {
    account: Account,
    lots: BTreeMap<LotId, Lot>,
    log: Vec<Transaction>,
    origins: HashMap<String, TransactionId>,
    awards: HashMap<String, AwardRecord>,
}

impl AccountRecord {
    fn new(key: AccountKey, opened_at: DateTime<Utc>) -> Self {
        Self {
            account: Account::open(key, opened_at),
            lots: BTreeMap::new(),
            log: Vec::new(),
            origins: HashMap::new(),
            awards: HashMap::new(),
        }
    }

    fn is_written(&self) -> bool {
        self.account.version > 0
    }

    fn snapshot(&self) -> AccountSnapshot {
        let mut lots: Vec<Lot> = self
            .lots
            .values()
            .filter(|lot| lot.state.is_live())
            .cloned()
            .collect();
        lots.sort_by_key(Lot::fifo_key);
        AccountSnapshot {
            account: self.account.clone(),
            lots,
        }
    }
}

/// Ledger store kept entirely in process memory.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    accounts: DashMap<AccountKey, Arc<Mutex<AccountRecord>>>,
    transactions: DashMap<TransactionId, Transaction>,
    reversals: DashMap<TransactionId, TransactionId>,
    audit: DashMap<AccountKey, Vec<AuditLogEntry>>,
    audit_ids: DashMap<AuditEntryId, ()>,
}

impl InMemoryLedgerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all balances, fee pool included.
    #[must_use]
    pub fn total_coins(&self) -> i64 {
        self.records()
            .iter()
            .filter_map(|record| lock(record).ok().map(|r| r.account.balance))
            .sum()
    }

    fn record(&self, key: AccountKey) -> Option<Arc<Mutex<AccountRecord>>> {
        self.accounts.get(&key).map(|entry| Arc::clone(entry.value()))
    }

    fn records(&self) -> Vec<Arc<Mutex<AccountRecord>>> {
        self.accounts
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn commit_locked(&self, batch: LedgerBatch) -> LedgerResult<()> {
        let LedgerBatch { mut writes, awards } = batch;
        writes.sort_by_key(|write| write.account.key);
        if writes
            .windows(2)
            .any(|pair| pair[0].account.key == pair[1].account.key)
        {
            return Err(LedgerError::Storage(
                "batch writes the same account twice".to_string(),
            ));
        }

        // Award outcomes live with their account, so a batch that only
        // records an award still locks that account.
        let mut touched: Vec<(AccountKey, DateTime<Utc>)> = writes
            .iter()
            .map(|write| (write.account.key, write.account.updated_at))
            .chain(awards.iter().map(|award| (award.account, award.recorded_at)))
            .collect();
        touched.sort_by_key(|(key, _)| *key);
        touched.dedup_by_key(|(key, _)| *key);

        let handles: Vec<(AccountKey, Arc<Mutex<AccountRecord>>)> = touched
            .into_iter()
            .map(|(key, opened_at)| {
                let handle = Arc::clone(
                    self.accounts
                        .entry(key)
                        .or_insert_with(|| Arc::new(Mutex::new(AccountRecord::new(key, opened_at))))
                        .value(),
                );
                (key, handle)
            })
            .collect();

        let mut guards = BTreeMap::new();
        for (key, handle) in &handles {
            guards.insert(*key, lock(handle)?);
        }

        for write in &writes {
            let record = guards.get(&write.account.key).ok_or_else(unlocked)?;
            if record.account.version != write.expected_version {
                return Err(LedgerError::StaleVersion {
                    account: write.account.key,
                    expected: write.expected_version,
                    actual: record.account.version,
                });
            }
            if let Some(tx) = &write.transaction {
                let reversal_taken = tx
                    .reverses
                    .is_some_and(|original| self.reversals.contains_key(&original));
                if record.origins.contains_key(&tx.origin_event_id) || reversal_taken {
                    return Err(LedgerError::DuplicateEvent {
                        account: write.account.key,
                        origin_event_id: tx.origin_event_id.clone(),
                    });
                }
            }
        }
        for award in &awards {
            let record = guards.get(&award.account).ok_or_else(unlocked)?;
            if record.awards.contains_key(&award.origin_event_id) {
                return Err(LedgerError::DuplicateEvent {
                    account: award.account,
                    origin_event_id: award.origin_event_id.clone(),
                });
            }
        }

        for write in writes {
            let record = guards.get_mut(&write.account.key).ok_or_else(unlocked)?;
            let mut account = write.account;
            if !record.is_written() {
                account.created_at = account.updated_at;
            }
            record.account = account;
            for lot in write.lots {
                record.lots.insert(lot.id, lot);
            }
            if let Some(tx) = write.transaction {
                record.origins.insert(tx.origin_event_id.clone(), tx.id);
                if let Some(original) = tx.reverses {
                    self.reversals.insert(original, tx.id);
                }
                self.transactions.insert(tx.id, tx.clone());
                record.log.push(tx);
            }
        }
        for award in awards {
            let record = guards.get_mut(&award.account).ok_or_else(unlocked)?;
            record.awards.insert(award.origin_event_id.clone(), award);
        }

        Ok(())
    }
}

fn unlocked() -> LedgerError {
    LedgerError::Storage("batch account was not locked".to_string())
}

fn lock(record: &Mutex<AccountRecord>) -> LedgerResult<MutexGuard<'_, AccountRecord>> {
    record
        .lock()
        .map_err(|_| LedgerError::Storage("account lock poisoned".to_string()))
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn snapshot(&self, key: AccountKey) -> LedgerResult<Option<AccountSnapshot>> {
        let Some(handle) = self.record(key) else {
            return Ok(None);
        };
        let record = lock(&handle)?;
        Ok(record.is_written().then(|| record.snapshot()))
    }

    async fn find_by_origin(
        &self,
        key: AccountKey,
        origin_event_id: &str,
    ) -> LedgerResult<Option<Transaction>> {
        let Some(handle) = self.record(key) else {
            return Ok(None);
        };
        let id = lock(&handle)?.origins.get(origin_event_id).copied();
        Ok(id.and_then(|id| self.transactions.get(&id).map(|tx| tx.clone())))
    }

    async fn find_award(
        &self,
        key: AccountKey,
        origin_event_id: &str,
    ) -> LedgerResult<Option<AwardRecord>> {
        let Some(handle) = self.record(key) else {
            return Ok(None);
        };
        Ok(lock(&handle)?.awards.get(origin_event_id).cloned())
    }

    async fn transaction(&self, id: TransactionId) -> LedgerResult<Option<Transaction>> {
        Ok(self.transactions.get(&id).map(|tx| tx.clone()))
    }

    async fn reversal_of(&self, id: TransactionId) -> LedgerResult<Option<Transaction>> {
        let reversal = self.reversals.get(&id).map(|entry| *entry.value());
        Ok(reversal.and_then(|rid| self.transactions.get(&rid).map(|tx| tx.clone())))
    }

    async fn commit(&self, batch: LedgerBatch) -> LedgerResult<()> {
        self.commit_locked(batch)
    }

    async fn history_page(
        &self,
        key: AccountKey,
        range: HistoryRange,
        after_version: i64,
        limit: u64,
    ) -> LedgerResult<Vec<Transaction>> {
        let Some(handle) = self.record(key) else {
            return Ok(Vec::new());
        };
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        let record = lock(&handle)?;
        Ok(record
            .log
            .iter()
            .filter(|tx| tx.account_version > after_version && range.contains(tx.created_at))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn earned_since(
        &self,
        student_id: StudentId,
        since: DateTime<Utc>,
    ) -> LedgerResult<i64> {
        let mut total = 0;
        for handle in self.records() {
            let record = lock(&handle)?;
            if record.account.key.student_id != student_id {
                continue;
            }
            total += record
                .log
                .iter()
                .filter(|tx| tx.kind == TransactionKind::Earn && tx.created_at >= since)
                .map(|tx| tx.amount)
                .sum::<i64>();
        }
        Ok(total)
    }

    async fn accounts_for_student(&self, student_id: StudentId) -> LedgerResult<Vec<Account>> {
        let mut accounts = Vec::new();
        for handle in self.records() {
            let record = lock(&handle)?;
            if record.account.key.student_id == student_id && record.is_written() {
                accounts.push(record.account.clone());
            }
        }
        accounts.sort_by_key(|account| account.key);
        Ok(accounts)
    }

    async fn lots_expiring_by(&self, cutoff: DateTime<Utc>) -> LedgerResult<Vec<Lot>> {
        let mut lots = Vec::new();
        for handle in self.records() {
            let record = lock(&handle)?;
            lots.extend(
                record
                    .lots
                    .values()
                    .filter(|lot| lot.state.is_live() && lot.expires_at <= cutoff)
                    .cloned(),
            );
        }
        lots.sort_by_key(Lot::fifo_key);
        Ok(lots)
    }
}

#[async_trait]
impl AuditLog for InMemoryLedgerStore {
    async fn append(&self, entry: &AuditLogEntry) -> LedgerResult<()> {
        if self.audit_ids.insert(entry.id, ()).is_some() {
            return Ok(());
        }
        self.audit
            .entry(entry.target_account)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn trail(&self, key: AccountKey) -> LedgerResult<Vec<AuditLogEntry>> {
        Ok(self
            .audit
            .get(&key)
            .map(|entries| entries.clone())
            .unwrap_or_default())
    }
}
