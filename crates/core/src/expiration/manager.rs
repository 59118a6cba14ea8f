//! Expiration sweeps.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::ledger::{
    retry_stale, AccountKey, AccountStore, LedgerResult, Lot, LotExpiry, LotState, RetryPolicy,
    Transaction,
};
use crate::notify::{NotificationEvent, NotificationKind, Outbox, Recipient};
use crate::policy::PolicyStore;

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// The instant the sweep evaluated lots against.
    pub as_of: DateTime<Utc>,
    /// Expire transactions produced.
    pub expired: Vec<Transaction>,
    /// Lots moved to `expired`, including ones with nothing left to debit.
    pub lots_expired: usize,
    /// Lots moved to `nearing_expiry`.
    pub notices_sent: usize,
    /// Due lots left for a later sweep because an older lot is still live.
    pub deferred: usize,
    /// Lots another writer settled first.
    pub skipped: usize,
    /// Lots that failed; the next sweep picks them up again.
    pub failures: usize,
}

/// Expires lots and warns their owners ahead of time.
#[derive(Debug)]
pub struct ExpirationManager {
    accounts: AccountStore,
    policies: Arc<PolicyStore>,
    outbox: Arc<Outbox>,
    retry: RetryPolicy,
}

impl ExpirationManager {
    /// Creates a manager.
    pub fn new(
        accounts: AccountStore,
        policies: Arc<PolicyStore>,
        outbox: Arc<Outbox>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            accounts,
            policies,
            outbox,
            retry,
        }
    }

    /// Runs one sweep as of `as_of`.
    ///
    /// Safe to re-run and to run concurrently with live traffic: every lot is
    /// its own store mutation and settled lots are skipped by state.
    pub async fn sweep(&self, as_of: DateTime<Utc>) -> LedgerResult<SweepReport> {
        let policy = self.policies.current();
        let cutoff = as_of + policy.max_notice_window();

        let mut by_account: BTreeMap<AccountKey, Vec<Lot>> = BTreeMap::new();
        for lot in self.accounts.lots_expiring_by(cutoff).await? {
            by_account.entry(lot.account).or_default().push(lot);
        }

        let mut report = SweepReport {
            as_of,
            ..SweepReport::default()
        };

        for (key, mut lots) in by_account {
            lots.sort_by_key(Lot::fifo_key);
            let notice = policy
                .expiration_for(key.discipline_id)
                .map_or_else(Duration::zero, |p| p.notice_window());

            for lot in lots {
                if lot.expires_at <= as_of {
                    self.expire(key, &lot, as_of, &mut report).await;
                } else if lot.state == LotState::Active && lot.expires_at - notice <= as_of {
                    self.warn_owner(key, &lot, &mut report).await;
                }
            }
        }

        info!(
            as_of = %as_of,
            lots_expired = report.lots_expired,
            notices_sent = report.notices_sent,
            deferred = report.deferred,
            failures = report.failures,
            "Expiration sweep finished"
        );
        Ok(report)
    }

    /// Sweeps every `interval`, forever.
    pub async fn run_periodic(self: Arc<Self>, interval: StdDuration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.sweep(self.accounts.now()).await {
                error!(error = %err, "Expiration sweep failed");
            }
        }
    }

    async fn expire(&self, key: AccountKey, lot: &Lot, as_of: DateTime<Utc>, report: &mut SweepReport) {
        let result = retry_stale(&self.retry, "expire_lot", || {
            self.accounts.expire_lot(key, lot.id, as_of)
        })
        .await;

        match result {
            Ok(LotExpiry::Expired(tx)) => {
                report.lots_expired += 1;
                if let Some(tx) = tx {
                    self.outbox.notify(NotificationEvent::new(
                        NotificationKind::CoinsExpired,
                        vec![Recipient::Student(key.student_id)],
                        json!({
                            "discipline_id": key.discipline_id,
                            "lot_id": lot.id,
                            "amount": -tx.amount,
                            "transaction_id": tx.id,
                        }),
                        as_of,
                    ));
                    report.expired.push(tx);
                }
            }
            Ok(LotExpiry::Deferred) => report.deferred += 1,
            Ok(LotExpiry::AlreadySettled | LotExpiry::NotDue) => report.skipped += 1,
            Err(err) => {
                warn!(account = %key, lot_id = %lot.id, error = %err, "Failed to expire lot");
                report.failures += 1;
            }
        }
    }

    async fn warn_owner(&self, key: AccountKey, lot: &Lot, report: &mut SweepReport) {
        let result = retry_stale(&self.retry, "mark_nearing_expiry", || {
            self.accounts.mark_nearing_expiry(key, lot.id)
        })
        .await;

        match result {
            Ok(true) => {
                report.notices_sent += 1;
                self.outbox.notify(NotificationEvent::new(
                    NotificationKind::LotNearingExpiry,
                    vec![Recipient::Student(key.student_id)],
                    json!({
                        "discipline_id": key.discipline_id,
                        "lot_id": lot.id,
                        "remaining": lot.remaining,
                        "expires_at": lot.expires_at,
                    }),
                    self.accounts.now(),
                ));
            }
            Ok(false) => report.skipped += 1,
            Err(err) => {
                warn!(account = %key, lot_id = %lot.id, error = %err, "Failed to mark lot nearing expiry");
                report.failures += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::clock::{Clock, ManualClock};
    use crate::ledger::{InMemoryLedgerStore, TransactionKind};
    use crate::notify::BroadcastNotifier;
    use crate::policy::PolicySnapshot;
    use chrono::TimeZone;
    use moeda_shared::config::PolicyConfig;
    use moeda_shared::types::{DisciplineId, StudentId};

    struct Fixture {
        clock: Arc<ManualClock>,
        accounts: AccountStore,
        notifier: BroadcastNotifier,
        manager: ExpirationManager,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        ));
        let backend = Arc::new(InMemoryLedgerStore::new());
        let accounts = AccountStore::new(backend.clone(), clock.clone());
        let policies = Arc::new(
            PolicyStore::new(PolicySnapshot::from_config(&PolicyConfig::default()).unwrap())
                .unwrap(),
        );
        let notifier = BroadcastNotifier::new(64);
        let audit: Arc<dyn AuditLog> = backend;
        let outbox = Arc::new(Outbox::new(audit, Arc::new(notifier.clone())));
        let manager = ExpirationManager::new(
            accounts.clone(),
            policies,
            outbox,
            RetryPolicy::immediate(3),
        );
        Fixture {
            clock,
            accounts,
            notifier,
            manager,
        }
    }

    fn key() -> AccountKey {
        AccountKey::new(StudentId::new(), DisciplineId::new())
    }

    #[tokio::test]
    async fn test_sweep_notices_then_expires() {
        let fx = fixture();
        let mut events = fx.notifier.subscribe();
        let key = key();
        fx.accounts
            .credit(key, 30, TransactionKind::Earn, "evt-1", Some(Duration::days(180)))
            .await
            .unwrap();
        let start = fx.clock.now();

        let quiet = fx.manager.sweep(start + Duration::days(100)).await.unwrap();
        assert_eq!(quiet.notices_sent, 0);
        assert!(quiet.expired.is_empty());

        let warned = fx.manager.sweep(start + Duration::days(170)).await.unwrap();
        assert_eq!(warned.notices_sent, 1);
        assert_eq!(events.recv().await.unwrap().kind, NotificationKind::LotNearingExpiry);

        let again = fx.manager.sweep(start + Duration::days(171)).await.unwrap();
        assert_eq!(again.notices_sent, 0);

        let expired = fx.manager.sweep(start + Duration::days(180)).await.unwrap();
        assert_eq!(expired.expired.len(), 1);
        assert_eq!(expired.expired[0].amount, -30);
        assert_eq!(expired.expired[0].kind, TransactionKind::Expire);
        assert_eq!(fx.accounts.balance(key).await.unwrap(), 0);
        assert_eq!(events.recv().await.unwrap().kind, NotificationKind::CoinsExpired);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let fx = fixture();
        let key = key();
        fx.accounts
            .credit(key, 30, TransactionKind::Earn, "evt-1", Some(Duration::days(10)))
            .await
            .unwrap();
        let as_of = fx.clock.now() + Duration::days(11);

        let first = fx.manager.sweep(as_of).await.unwrap();
        let second = fx.manager.sweep(as_of).await.unwrap();

        assert_eq!(first.expired.len(), 1);
        assert!(second.expired.is_empty());
        assert_eq!(second.lots_expired, 0);
        assert_eq!(fx.accounts.balance(key).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_partially_spent_lot_expires_remaining() {
        let fx = fixture();
        let key = key();
        fx.accounts
            .credit(key, 50, TransactionKind::Earn, "evt-1", Some(Duration::days(10)))
            .await
            .unwrap();
        fx.accounts
            .credit(key, 7, TransactionKind::Adjust, "manual-1", None)
            .await
            .unwrap();
        fx.accounts
            .debit(key, 20, TransactionKind::Spend, "buy-1")
            .await
            .unwrap();

        let report = fx
            .manager
            .sweep(fx.clock.now() + Duration::days(10))
            .await
            .unwrap();

        assert_eq!(report.expired[0].amount, -30);
        assert_eq!(fx.accounts.balance(key).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_younger_lot_waits_for_older_one() {
        let fx = fixture();
        let key = key();
        fx.accounts
            .credit(key, 10, TransactionKind::Earn, "old", Some(Duration::days(60)))
            .await
            .unwrap();
        fx.clock.advance(Duration::days(1));
        fx.accounts
            .credit(key, 20, TransactionKind::Earn, "young", Some(Duration::days(5)))
            .await
            .unwrap();

        let report = fx
            .manager
            .sweep(fx.clock.now() + Duration::days(6))
            .await
            .unwrap();

        assert_eq!(report.deferred, 1);
        assert!(report.expired.is_empty());
        assert_eq!(fx.accounts.balance(key).await.unwrap(), 30);

        let later = fx
            .manager
            .sweep(fx.clock.now() + Duration::days(60))
            .await
            .unwrap();
        let amounts: Vec<i64> = later.expired.iter().map(|tx| tx.amount).collect();
        assert_eq!(amounts, vec![-10, -20]);
    }
}
