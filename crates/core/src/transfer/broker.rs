//! Inter-discipline transfers and purchases.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::types::{SpendReceipt, SpendRequest, TransferReceipt, TransferRequest};
use crate::ledger::balance::{self, CreditSpec, DebitSpec, LotSource};
use crate::ledger::{
    AccountKey, AccountSnapshot, AccountStore, LedgerBatch, LedgerError, LedgerResult, Lot,
    Transaction, TransactionKind,
};
use crate::policy::PolicyStore;

/// Moves coins between discipline accounts and debits purchases.
#[derive(Debug)]
pub struct TransferBroker {
    accounts: AccountStore,
    policies: Arc<PolicyStore>,
}

impl TransferBroker {
    /// Creates a broker.
    pub fn new(accounts: AccountStore, policies: Arc<PolicyStore>) -> Self {
        Self { accounts, policies }
    }

    /// Transfers coins from one discipline to another, minus the fee.
    ///
    /// The source debit, the destination credit and the fee-pool credit
    /// commit as one batch. Coins arriving at the destination keep the
    /// expiry dates of the source lots they came from, oldest first; the fee
    /// is taken from the newest coins.
    pub async fn transfer(&self, request: &TransferRequest) -> LedgerResult<TransferReceipt> {
        let policy = self.policies.current();
        if !policy.transfer.separation_enabled {
            return Err(LedgerError::TransferNotApplicable(
                "discipline separation is disabled".to_string(),
            ));
        }
        if request.from == request.to {
            return Err(LedgerError::TransferNotApplicable(
                "source and destination are the same discipline".to_string(),
            ));
        }
        if request.student_id.is_system() {
            return Err(LedgerError::TransferNotApplicable(
                "the fee pool cannot transfer".to_string(),
            ));
        }
        if request.amount <= 0 {
            return Err(LedgerError::InvalidAmount(request.amount));
        }

        if let Some(receipt) = self.replay_transfer(request).await? {
            debug!(origin_event_id = %request.origin_event_id, "Replaying transfer");
            return Ok(receipt);
        }

        let fee = policy.transfer.fee_for(request.amount);
        let delivered = request.amount - fee;
        let now = self.accounts.now();

        let source = self.accounts.snapshot_or_empty(request.source(), now).await?;
        let destination = self
            .accounts
            .snapshot_or_empty(request.destination(), now)
            .await?;

        let out_write = balance::post_debit(
            &source,
            DebitSpec {
                amount: request.amount,
                kind: TransactionKind::TransferOut,
                origin_event_id: request.origin_event_id.clone(),
                allow_negative: false,
            },
            now,
        )?;
        let transfer_out = out_write
            .transaction
            .clone()
            .ok_or_else(|| LedgerError::Storage("transfer debit without transaction".into()))?;

        let in_write = balance::post_credit(
            &destination,
            CreditSpec {
                amount: delivered,
                kind: TransactionKind::TransferIn,
                origin_event_id: request.origin_event_id.clone(),
                lots: LotSource::Inherited(balance::take_oldest(
                    &transfer_out.allocations,
                    delivered,
                )),
                reverses: None,
            },
            now,
        )?;
        let transfer_in = in_write
            .transaction
            .clone()
            .ok_or_else(|| LedgerError::Storage("transfer credit without transaction".into()))?;

        let mut batch = LedgerBatch::single(out_write).with(in_write);
        let mut fee_credit = None;
        if fee > 0 {
            let pool = self.accounts.snapshot_or_empty(AccountKey::FEE_POOL, now).await?;
            let fee_write = balance::post_credit(
                &pool,
                CreditSpec {
                    amount: fee,
                    kind: TransactionKind::Earn,
                    origin_event_id: transfer_out.id.to_string(),
                    lots: LotSource::None,
                    reverses: None,
                },
                now,
            )?;
            fee_credit = fee_write.transaction.clone();
            batch = batch.with(fee_write);
        }

        match self.accounts.commit_batch(batch).await {
            Ok(()) => {}
            Err(LedgerError::DuplicateEvent { .. }) => {
                if let Some(receipt) = self.replay_transfer(request).await? {
                    return Ok(receipt);
                }
                return Err(LedgerError::DuplicateEvent {
                    account: request.source(),
                    origin_event_id: request.origin_event_id.clone(),
                });
            }
            Err(err) => return Err(err),
        }

        info!(
            student_id = %request.student_id,
            from = %request.from,
            to = %request.to,
            amount = request.amount,
            fee,
            "Transferred coins between disciplines"
        );
        Ok(TransferReceipt {
            transfer_out,
            transfer_in,
            fee,
            fee_credit,
        })
    }

    /// Debits a purchase.
    ///
    /// With separation on, the discipline account pays. With separation off
    /// the student's accounts form one pool: the oldest lots across all of
    /// them go first, then unlotted coins, starting with the purchase's own
    /// discipline. Every account touched gets its own spend transaction and
    /// all of them commit together.
    pub async fn spend(&self, request: &SpendRequest) -> LedgerResult<SpendReceipt> {
        if request.amount <= 0 {
            return Err(LedgerError::InvalidAmount(request.amount));
        }

        let policy = self.policies.current();
        if policy.transfer.separation_enabled {
            let tx = self
                .accounts
                .debit(
                    request.account(),
                    request.amount,
                    TransactionKind::Spend,
                    &request.origin_event_id,
                )
                .await?;
            return Ok(SpendReceipt {
                transactions: vec![tx],
                pooled: false,
            });
        }

        if let Some(receipt) = self.replay_pooled_spend(request).await? {
            return Ok(receipt);
        }

        let now = self.accounts.now();
        let mut keys: Vec<AccountKey> = self
            .accounts
            .accounts_for_student(request.student_id)
            .await?
            .into_iter()
            .map(|account| account.key)
            .collect();
        if !keys.contains(&request.account()) {
            keys.push(request.account());
        }

        let mut snapshots = BTreeMap::new();
        for key in keys {
            snapshots.insert(key, self.accounts.snapshot_or_empty(key, now).await?);
        }

        let shares = plan_pooled_spend(&snapshots, request)?;

        let mut batch = LedgerBatch::default();
        for (key, share) in &shares {
            let write = balance::post_debit(
                &snapshots[key],
                DebitSpec {
                    amount: *share,
                    kind: TransactionKind::Spend,
                    origin_event_id: request.origin_event_id.clone(),
                    allow_negative: false,
                },
                now,
            )?;
            batch = batch.with(write);
        }
        let transactions: Vec<Transaction> = batch.transactions().cloned().collect();

        match self.accounts.commit_batch(batch).await {
            Ok(()) => {}
            Err(LedgerError::DuplicateEvent { account, origin_event_id }) => {
                return self
                    .replay_pooled_spend(request)
                    .await?
                    .ok_or(LedgerError::DuplicateEvent {
                        account,
                        origin_event_id,
                    });
            }
            Err(err) => return Err(err),
        }

        info!(
            student_id = %request.student_id,
            amount = request.amount,
            accounts = transactions.len(),
            "Spent from pooled balance"
        );
        Ok(SpendReceipt {
            transactions,
            pooled: true,
        })
    }

    async fn replay_transfer(&self, request: &TransferRequest) -> LedgerResult<Option<TransferReceipt>> {
        let Some(transfer_out) = self
            .accounts
            .find_by_origin(request.source(), &request.origin_event_id)
            .await?
        else {
            return Ok(None);
        };
        if transfer_out.kind != TransactionKind::TransferOut {
            return Err(LedgerError::DuplicateEvent {
                account: request.source(),
                origin_event_id: request.origin_event_id.clone(),
            });
        }

        let transfer_in = self
            .accounts
            .find_by_origin(request.destination(), &request.origin_event_id)
            .await?
            .ok_or_else(|| LedgerError::Storage("transfer recorded without its credit leg".into()))?;
        let fee_credit = self
            .accounts
            .find_by_origin(AccountKey::FEE_POOL, &transfer_out.id.to_string())
            .await?;

        Ok(Some(TransferReceipt {
            fee: -transfer_out.amount - transfer_in.amount,
            transfer_out,
            transfer_in,
            fee_credit,
        }))
    }

    async fn replay_pooled_spend(&self, request: &SpendRequest) -> LedgerResult<Option<SpendReceipt>> {
        let mut transactions = Vec::new();
        for account in self.accounts.accounts_for_student(request.student_id).await? {
            if let Some(tx) = self
                .accounts
                .find_by_origin(account.key, &request.origin_event_id)
                .await?
            {
                transactions.push(tx);
            }
        }
        Ok((!transactions.is_empty()).then_some(SpendReceipt {
            transactions,
            pooled: true,
        }))
    }
}

/// Splits a pooled purchase into per-account debits.
fn plan_pooled_spend(
    snapshots: &BTreeMap<AccountKey, AccountSnapshot>,
    request: &SpendRequest,
) -> LedgerResult<BTreeMap<AccountKey, i64>> {
    let mut available: BTreeMap<AccountKey, i64> = snapshots
        .iter()
        .map(|(key, snapshot)| (*key, snapshot.account.balance.max(0)))
        .collect();
    let total: i64 = available.values().sum();
    if total < request.amount {
        return Err(LedgerError::InsufficientBalance {
            account: request.account(),
            requested: request.amount,
            available: total,
        });
    }

    let mut lots: Vec<&Lot> = snapshots.values().flat_map(|s| s.lots.iter()).collect();
    lots.sort_by_key(|lot| lot.fifo_key());

    let mut shares: BTreeMap<AccountKey, i64> = BTreeMap::new();
    let mut left = request.amount;
    let mut take = |key: AccountKey, wanted: i64, left: &mut i64| {
        let room = available.get(&key).copied().unwrap_or(0);
        let part = wanted.min(room).min(*left);
        if part > 0 {
            *left -= part;
            *shares.entry(key).or_default() += part;
            available.insert(key, room - part);
        }
    };

    for lot in lots {
        if left == 0 {
            break;
        }
        take(lot.account, lot.remaining, &mut left);
    }

    let mut order: Vec<AccountKey> = vec![request.account()];
    order.extend(snapshots.keys().copied().filter(|key| *key != request.account()));
    for key in order {
        if left == 0 {
            break;
        }
        take(key, i64::MAX, &mut left);
    }

    Ok(shares)
}
