//! PostgreSQL implementation of [`LedgerStore`].
//!
//! Optimistic concurrency is enforced in SQL: account updates carry a
//! `WHERE version = expected` filter, and idempotency rides on the unique
//! constraints of `ledger_transactions`. A batch runs in one database
//! transaction, so a failed write rolls back every other write with it.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    AccessMode, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    IsolationLevel, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use tracing::debug;

use moeda_core::ledger::{
    Account, AccountKey, AccountSnapshot, AccountWrite, HistoryRange, LedgerBatch, LedgerError,
    LedgerResult, LedgerStore, Lot, LotState, Transaction, TransactionKind,
};
use moeda_core::rules::AwardRecord;
use moeda_shared::types::{StudentId, TransactionId};

use super::mapping::{account_model, award_model, db_err, lot_model, transaction_model};
use crate::entities::{accounts, award_outcomes, ledger_transactions, lots};

fn live_states() -> Vec<&'static str> {
    LotState::ALL
        .iter()
        .filter(|state| state.is_live())
        .map(|state| state.as_str())
        .collect()
}

/// Ledger store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    db: DatabaseConnection,
}

impl PgLedgerStore {
    /// Creates a store on top of a connection pool.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Applies one account's write inside `txn`.
    async fn apply_write(txn: &DatabaseTransaction, write: &AccountWrite) -> LedgerResult<()> {
        let key = write.account.key;

        if write.expected_version == 0 {
            let inserted = accounts::Entity::insert(account_model(&write.account))
                .on_conflict(
                    OnConflict::columns([
                        accounts::Column::StudentId,
                        accounts::Column::DisciplineId,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .exec_without_returning(txn)
                .await
                .map_err(db_err)?;
            if inserted == 0 {
                return Err(Self::stale(txn, write).await);
            }
        } else {
            let updated_at: DateTime<FixedOffset> = write.account.updated_at.into();
            let result = accounts::Entity::update_many()
                .col_expr(accounts::Column::Balance, Expr::value(write.account.balance))
                .col_expr(accounts::Column::Version, Expr::value(write.account.version))
                .col_expr(
                    accounts::Column::AllowNegative,
                    Expr::value(write.account.allow_negative),
                )
                .col_expr(accounts::Column::UpdatedAt, Expr::value(updated_at))
                .filter(accounts::Column::StudentId.eq(key.student_id.into_inner()))
                .filter(accounts::Column::DisciplineId.eq(key.discipline_id.into_inner()))
                .filter(accounts::Column::Version.eq(write.expected_version))
                .exec(txn)
                .await
                .map_err(db_err)?;
            if result.rows_affected == 0 {
                return Err(Self::stale(txn, write).await);
            }
        }

        // Lots reference their source transaction, so the log row goes first.
        if let Some(tx) = &write.transaction {
            let inserted = ledger_transactions::Entity::insert(transaction_model(tx)?)
                .on_conflict(OnConflict::new().do_nothing().to_owned())
                .exec_without_returning(txn)
                .await
                .map_err(db_err)?;
            if inserted == 0 {
                return Err(LedgerError::DuplicateEvent {
                    account: key,
                    origin_event_id: tx.origin_event_id.clone(),
                });
            }
        }

        for lot in &write.lots {
            lots::Entity::insert(lot_model(lot))
                .on_conflict(
                    OnConflict::column(lots::Column::Id)
                        .update_columns([lots::Column::Remaining, lots::Column::State])
                        .to_owned(),
                )
                .exec_without_returning(txn)
                .await
                .map_err(db_err)?;
        }

        Ok(())
    }

    /// Records an award outcome inside `txn`; the key is the origin event.
    async fn apply_award(txn: &DatabaseTransaction, award: &AwardRecord) -> LedgerResult<()> {
        let inserted = award_outcomes::Entity::insert(award_model(award)?)
            .on_conflict(OnConflict::new().do_nothing().to_owned())
            .exec_without_returning(txn)
            .await
            .map_err(db_err)?;
        if inserted == 0 {
            return Err(LedgerError::DuplicateEvent {
                account: award.account,
                origin_event_id: award.origin_event_id.clone(),
            });
        }
        Ok(())
    }

    /// Builds the `StaleVersion` error for a write that lost the race.
    async fn stale(txn: &DatabaseTransaction, write: &AccountWrite) -> LedgerError {
        let key = write.account.key;
        let actual = accounts::Entity::find_by_id((
            key.student_id.into_inner(),
            key.discipline_id.into_inner(),
        ))
        .one(txn)
        .await;
        match actual {
            Ok(current) => {
                let actual = current.map_or(0, |model| model.version);
                debug!(account = %key, expected = write.expected_version, actual, "Stale account version");
                LedgerError::StaleVersion {
                    account: key,
                    expected: write.expected_version,
                    actual,
                }
            }
            Err(e) => db_err(e),
        }
    }

    /// Narrows `query` to one account's rows.
    fn account_filter<E, C>(
        query: sea_orm::Select<E>,
        student: C,
        discipline: C,
        key: AccountKey,
    ) -> sea_orm::Select<E>
    where
        E: EntityTrait,
        C: ColumnTrait,
    {
        query
            .filter(student.eq(key.student_id.into_inner()))
            .filter(discipline.eq(key.discipline_id.into_inner()))
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn snapshot(&self, key: AccountKey) -> LedgerResult<Option<AccountSnapshot>> {
        // One consistent view of the account row and its lots.
        let txn = self
            .db
            .begin_with_config(Some(IsolationLevel::RepeatableRead), Some(AccessMode::ReadOnly))
            .await
            .map_err(db_err)?;

        let Some(account) = accounts::Entity::find_by_id((
            key.student_id.into_inner(),
            key.discipline_id.into_inner(),
        ))
        .one(&txn)
        .await
        .map_err(db_err)?
        else {
            return Ok(None);
        };

        let lots = Self::account_filter(
            lots::Entity::find(),
            lots::Column::StudentId,
            lots::Column::DisciplineId,
            key,
        )
        .filter(lots::Column::State.is_in(live_states()))
        .order_by_asc(lots::Column::EarnedAt)
        .order_by_asc(lots::Column::Id)
        .all(&txn)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(Lot::try_from)
        .collect::<LedgerResult<Vec<_>>>()?;

        txn.commit().await.map_err(db_err)?;

        Ok(Some(AccountSnapshot {
            account: Account::from(account),
            lots,
        }))
    }

    async fn find_by_origin(
        &self,
        key: AccountKey,
        origin_event_id: &str,
    ) -> LedgerResult<Option<Transaction>> {
        Self::account_filter(
            ledger_transactions::Entity::find(),
            ledger_transactions::Column::StudentId,
            ledger_transactions::Column::DisciplineId,
            key,
        )
        .filter(ledger_transactions::Column::OriginEventId.eq(origin_event_id))
        .one(&self.db)
        .await
        .map_err(db_err)?
        .map(Transaction::try_from)
        .transpose()
    }

    async fn find_award(
        &self,
        key: AccountKey,
        origin_event_id: &str,
    ) -> LedgerResult<Option<AwardRecord>> {
        award_outcomes::Entity::find_by_id((
            key.student_id.into_inner(),
            key.discipline_id.into_inner(),
            origin_event_id.to_string(),
        ))
        .one(&self.db)
        .await
        .map_err(db_err)?
        .map(AwardRecord::try_from)
        .transpose()
    }

    async fn transaction(&self, id: TransactionId) -> LedgerResult<Option<Transaction>> {
        ledger_transactions::Entity::find_by_id(id.into_inner())
            .one(&self.db)
            .await
            .map_err(db_err)?
            .map(Transaction::try_from)
            .transpose()
    }

    async fn reversal_of(&self, id: TransactionId) -> LedgerResult<Option<Transaction>> {
        ledger_transactions::Entity::find()
            .filter(ledger_transactions::Column::Reverses.eq(id.into_inner()))
            .one(&self.db)
            .await
            .map_err(db_err)?
            .map(Transaction::try_from)
            .transpose()
    }

    async fn commit(&self, batch: LedgerBatch) -> LedgerResult<()> {
        let LedgerBatch { mut writes, awards } = batch;
        // Row locks are taken in key order across all writers.
        writes.sort_by_key(|write| write.account.key);
        if writes
            .windows(2)
            .any(|pair| pair[0].account.key == pair[1].account.key)
        {
            return Err(LedgerError::Storage(
                "batch writes the same account twice".to_string(),
            ));
        }

        let txn = self.db.begin().await.map_err(db_err)?;
        for write in &writes {
            Self::apply_write(&txn, write).await?;
        }
        // Outcomes reference the earn rows written above.
        for award in &awards {
            Self::apply_award(&txn, award).await?;
        }
        txn.commit().await.map_err(db_err)?;

        debug!(writes = writes.len(), awards = awards.len(), "Committed ledger batch");
        Ok(())
    }

    async fn history_page(
        &self,
        key: AccountKey,
        range: HistoryRange,
        after_version: i64,
        limit: u64,
    ) -> LedgerResult<Vec<Transaction>> {
        let mut query = Self::account_filter(
            ledger_transactions::Entity::find(),
            ledger_transactions::Column::StudentId,
            ledger_transactions::Column::DisciplineId,
            key,
        )
        .filter(ledger_transactions::Column::AccountVersion.gt(after_version));
        if let Some(from) = range.from {
            query = query.filter(ledger_transactions::Column::CreatedAt.gte(from));
        }
        if let Some(to) = range.to {
            query = query.filter(ledger_transactions::Column::CreatedAt.lt(to));
        }

        query
            .order_by_asc(ledger_transactions::Column::AccountVersion)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(Transaction::try_from)
            .collect()
    }

    async fn earned_since(
        &self,
        student_id: StudentId,
        since: DateTime<Utc>,
    ) -> LedgerResult<i64> {
        let total: Option<i64> = ledger_transactions::Entity::find()
            .select_only()
            .column_as(Expr::cust("COALESCE(SUM(amount), 0)::BIGINT"), "total")
            .filter(ledger_transactions::Column::StudentId.eq(student_id.into_inner()))
            .filter(ledger_transactions::Column::Kind.eq(TransactionKind::Earn.as_str()))
            .filter(ledger_transactions::Column::CreatedAt.gte(since))
            .into_tuple()
            .one(&self.db)
            .await
            .map_err(db_err)?;
        Ok(total.unwrap_or(0))
    }

    async fn accounts_for_student(&self, student_id: StudentId) -> LedgerResult<Vec<Account>> {
        Ok(accounts::Entity::find()
            .filter(accounts::Column::StudentId.eq(student_id.into_inner()))
            .order_by_asc(accounts::Column::DisciplineId)
            .all(&self.db)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(Account::from)
            .collect())
    }

    async fn lots_expiring_by(&self, cutoff: DateTime<Utc>) -> LedgerResult<Vec<Lot>> {
        lots::Entity::find()
            .filter(lots::Column::State.is_in(live_states()))
            .filter(lots::Column::ExpiresAt.lte(cutoff))
            .order_by_asc(lots::Column::EarnedAt)
            .order_by_asc(lots::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(Lot::try_from)
            .collect()
    }
}
