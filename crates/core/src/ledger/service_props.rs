//! Property-based tests for the Account Store and the services built on it.
//!
//! - Balance equals the sum of the account's transaction log
//! - Coins are conserved by transfers (fee pool included)
//! - Replaying an origin event never changes a balance
//! - Lots are consumed oldest first
//! - Awards never exceed the per-period cap
//! - Cancelling a purchase restores balance and lots

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use moeda_shared::config::{LedgerConfig, PolicyConfig};
use moeda_shared::types::{ActorId, DisciplineId, StudentId, TransactionId};

use super::error::LedgerError;
use super::memory::InMemoryLedgerStore;
use super::types::{AccountKey, AccountSnapshot, HistoryRange, TransactionKind};
use crate::admin::CancelRequest;
use crate::audit::{Actor, StaffRole};
use crate::clock::ManualClock;
use crate::policy::{EventType, PolicySnapshot};
use crate::rules::AwardRequest;
use crate::services::LedgerServices;
use crate::transfer::{SpendRequest, TransferRequest};

#[derive(Debug, Clone, Copy)]
enum Op {
    Credit(i64),
    Debit(i64),
}

/// Strategy for a single ledger operation.
fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1i64..200).prop_map(Op::Credit),
        (1i64..200).prop_map(Op::Debit),
    ]
}

/// Strategy for a sequence of operations on one account.
fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op_strategy(), 1..25)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

struct Harness {
    clock: Arc<ManualClock>,
    backend: Arc<InMemoryLedgerStore>,
    services: LedgerServices,
}

fn harness_with(configure: impl FnOnce(&mut PolicySnapshot)) -> Harness {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 2, 9, 8, 0, 0).unwrap(),
    ));
    let backend = Arc::new(InMemoryLedgerStore::new());
    let mut snapshot = PolicySnapshot::from_config(&PolicyConfig::default()).unwrap();
    configure(&mut snapshot);
    let services = LedgerServices::with_snapshot(
        backend.clone(),
        clock.clone(),
        &LedgerConfig::default(),
        snapshot,
    )
    .unwrap();
    Harness {
        clock,
        backend,
        services,
    }
}

fn harness() -> Harness {
    harness_with(|_| {})
}

/// Applies `ops` to `key`, one minute apart.
///
/// Returns the expected balance and the operations that committed.
async fn apply(h: &Harness, key: AccountKey, ops: &[Op]) -> (i64, Vec<(String, Op, TransactionId)>) {
    let mut expected = 0;
    let mut committed = Vec::new();
    for (i, op) in ops.iter().enumerate() {
        h.clock.advance(Duration::minutes(1));
        let origin = format!("op-{i}");
        match *op {
            Op::Credit(amount) => {
                let tx = h
                    .services
                    .accounts
                    .credit(key, amount, TransactionKind::Earn, &origin, Some(Duration::days(180)))
                    .await
                    .unwrap();
                expected += amount;
                committed.push((origin, *op, tx.id));
            }
            Op::Debit(amount) => {
                match h
                    .services
                    .accounts
                    .debit(key, amount, TransactionKind::Spend, &origin)
                    .await
                {
                    Ok(tx) => {
                        expected -= amount;
                        committed.push((origin, *op, tx.id));
                    }
                    Err(LedgerError::InsufficientBalance { .. }) => assert!(amount > expected),
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
        }
    }
    (expected, committed)
}

fn account() -> AccountKey {
    AccountKey::new(StudentId::new(), DisciplineId::new())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Balance always equals the sum of the log and never goes negative.
    #[test]
    fn prop_balance_matches_log(ops in ops_strategy()) {
        let rt = runtime();
        rt.block_on(async {
            let h = harness();
            let key = account();
            let (expected, _) = apply(&h, key, &ops).await;

            let balance = h.services.accounts.balance(key).await.unwrap();
            let log = h
                .services
                .accounts
                .history(key, HistoryRange::all())
                .collect_all()
                .await
                .unwrap();

            prop_assert_eq!(balance, expected);
            prop_assert!(balance >= 0);
            prop_assert_eq!(log.iter().map(|tx| tx.amount).sum::<i64>(), balance);
            Ok(())
        })?;
    }

    /// Replaying committed operations returns the original transactions and
    /// leaves balance and log untouched.
    #[test]
    fn prop_replay_is_idempotent(ops in ops_strategy()) {
        let rt = runtime();
        rt.block_on(async {
            let h = harness();
            let key = account();
            let (expected, committed) = apply(&h, key, &ops).await;

            for (origin, op, id) in &committed {
                let replayed = match *op {
                    Op::Credit(amount) => h
                        .services
                        .accounts
                        .credit(key, amount, TransactionKind::Earn, origin, Some(Duration::days(180)))
                        .await,
                    Op::Debit(amount) => h
                        .services
                        .accounts
                        .debit(key, amount, TransactionKind::Spend, origin)
                        .await,
                };
                prop_assert_eq!(replayed.unwrap().id, *id);
            }

            prop_assert_eq!(h.services.accounts.balance(key).await.unwrap(), expected);
            let log = h
                .services
                .accounts
                .history(key, HistoryRange::all())
                .collect_all()
                .await
                .unwrap();
            prop_assert_eq!(log.len(), committed.len());
            Ok(())
        })?;
    }

    /// Only the oldest live lot can be partially consumed, and lots cover
    /// the whole balance when every credit carries one.
    #[test]
    fn prop_lots_consumed_oldest_first(ops in ops_strategy()) {
        let rt = runtime();
        rt.block_on(async {
            let h = harness();
            let key = account();
            let (expected, _) = apply(&h, key, &ops).await;

            let snapshot = h.services.accounts.account(key).await.unwrap();
            let mut live: Vec<_> = snapshot.lots.iter().filter(|lot| lot.state.is_live()).collect();
            live.sort_by_key(|lot| lot.fifo_key());

            prop_assert_eq!(live.iter().map(|lot| lot.remaining).sum::<i64>(), expected);
            for lot in live.iter().skip(1) {
                prop_assert_eq!(lot.remaining, lot.amount);
            }
            Ok(())
        })?;
    }

    /// Transfers move coins between accounts and the fee pool, never
    /// creating or destroying any.
    #[test]
    fn prop_transfer_conserves_coins(
        earned in 1i64..500,
        amounts in prop::collection::vec(1i64..300, 1..8),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let h = harness();
            let student = StudentId::new();
            let (from, to) = (DisciplineId::new(), DisciplineId::new());
            h.services
                .accounts
                .credit(AccountKey::new(student, from), earned, TransactionKind::Earn, "seed", None)
                .await
                .unwrap();

            for (i, amount) in amounts.iter().enumerate() {
                let result = h
                    .services
                    .transfers
                    .transfer(&TransferRequest {
                        student_id: student,
                        from,
                        to,
                        amount: *amount,
                        origin_event_id: format!("transfer-{i}"),
                    })
                    .await;
                match result {
                    Ok(receipt) => prop_assert_eq!(
                        -receipt.transfer_out.amount,
                        receipt.transfer_in.amount + receipt.fee
                    ),
                    Err(LedgerError::InsufficientBalance { .. }) => {}
                    Err(other) => panic!("unexpected error: {other}"),
                }
                prop_assert_eq!(h.backend.total_coins(), earned);
            }

            let pool = h.services.accounts.balance(AccountKey::FEE_POOL).await.unwrap();
            let student_total = h.services.accounts.pooled_balance(student).await.unwrap();
            prop_assert_eq!(pool + student_total, earned);
            Ok(())
        })?;
    }

    /// Coins granted inside one period never exceed the rule's cap.
    #[test]
    fn prop_awards_respect_cap(cap in 1i64..100, events in 1usize..30) {
        let rt = runtime();
        rt.block_on(async {
            let h = harness_with(|snapshot| {
                for rule in snapshot.rules.values_mut() {
                    rule.per_period_cap = cap;
                }
            });
            let key = account();

            let mut granted = 0;
            for i in 0..events {
                let outcome = h
                    .services
                    .rules
                    .award(&AwardRequest {
                        student_id: key.student_id,
                        discipline_id: key.discipline_id,
                        event_type: EventType::ActivityDelivered,
                        origin_event_id: format!("delivery-{i}"),
                        grade: None,
                    })
                    .await
                    .unwrap();
                granted += outcome.granted();
            }

            prop_assert!(granted <= cap);
            prop_assert_eq!(granted, cap.min(10 * i64::try_from(events).unwrap()));
            prop_assert_eq!(h.services.accounts.balance(key).await.unwrap(), granted);
            Ok(())
        })?;
    }

    /// Cancelling a purchase puts back the coins and the lots they came from.
    #[test]
    fn prop_cancel_restores_spend(
        credits in prop::collection::vec(1i64..100, 1..6),
        fraction in 1i64..=100,
    ) {
        let rt = runtime();
        rt.block_on(async {
            let h = harness();
            let key = account();
            for (i, amount) in credits.iter().enumerate() {
                h.clock.advance(Duration::hours(1));
                h.services
                    .accounts
                    .credit(key, *amount, TransactionKind::Earn, &format!("earn-{i}"), Some(Duration::days(90)))
                    .await
                    .unwrap();
            }
            let before = h.services.accounts.account(key).await.unwrap();
            let total: i64 = credits.iter().sum();
            let price = (total * fraction / 100).max(1);

            let receipt = h
                .services
                .transfers
                .spend(&SpendRequest {
                    student_id: key.student_id,
                    discipline_id: key.discipline_id,
                    amount: price,
                    origin_event_id: "purchase-1".into(),
                })
                .await
                .unwrap();
            prop_assert_eq!(receipt.total(), price);

            h.services
                .admin
                .cancel_purchase(&CancelRequest {
                    transaction_id: receipt.transactions[0].id,
                    actor: Actor { id: ActorId::new(), role: StaffRole::Administrator },
                    reason: None,
                })
                .await
                .unwrap();

            let after = h.services.accounts.account(key).await.unwrap();
            prop_assert_eq!(after.account.balance, total);
            let remaining = |snapshot: &AccountSnapshot| {
                let mut dates: Vec<_> = snapshot
                    .lots
                    .iter()
                    .filter(|lot| lot.state.is_live())
                    .map(|lot| (lot.earned_at, lot.expires_at))
                    .collect();
                dates.sort();
                dates.dedup();
                (snapshot.lotted_balance(), dates)
            };
            prop_assert_eq!(remaining(&after), remaining(&before));
            Ok(())
        })?;
    }
}
