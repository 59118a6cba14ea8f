//! Wiring for the whole ledger.

use std::sync::Arc;
use std::time::Duration;

use moeda_shared::config::{LedgerConfig, PolicyConfig};

use crate::admin::AdminService;
use crate::audit::AuditLog;
use crate::clock::{Clock, SystemClock};
use crate::expiration::ExpirationManager;
use crate::ledger::{AccountStore, InMemoryLedgerStore, LedgerResult, LedgerStore, RetryPolicy};
use crate::notify::{BroadcastNotifier, Outbox};
use crate::policy::{PolicySnapshot, PolicyStore};
use crate::rules::RulesEngine;
use crate::transfer::TransferBroker;

/// Every ledger component, sharing one backend, clock and policy store.
#[derive(Debug)]
pub struct LedgerServices {
    /// Account Store.
    pub accounts: AccountStore,
    /// Active policies.
    pub policies: Arc<PolicyStore>,
    /// Distribution Rules Engine.
    pub rules: RulesEngine,
    /// Expiration Manager.
    pub expiration: Arc<ExpirationManager>,
    /// Transfer Broker.
    pub transfers: TransferBroker,
    /// Admin Override & Audit.
    pub admin: AdminService,
    /// Side-effect outbox.
    pub outbox: Arc<Outbox>,
    /// Notification stream.
    pub notifier: BroadcastNotifier,
    /// Retry policy for callers hitting `StaleVersion`.
    pub retry: RetryPolicy,
    /// Interval between background sweeps.
    pub sweep_interval: Duration,
    /// Interval between outbox redeliveries.
    pub outbox_interval: Duration,
}

impl LedgerServices {
    /// Builds the services over `backend`, which stores both the ledger and
    /// the audit log.
    pub fn new<B>(
        backend: Arc<B>,
        clock: Arc<dyn Clock>,
        ledger: &LedgerConfig,
        policies: &PolicyConfig,
    ) -> LedgerResult<Self>
    where
        B: LedgerStore + AuditLog + 'static,
    {
        let snapshot = PolicySnapshot::from_config(policies)?;
        Self::with_snapshot(backend, clock, ledger, snapshot)
    }

    /// Builds the services with an explicit policy snapshot.
    pub fn with_snapshot<B>(
        backend: Arc<B>,
        clock: Arc<dyn Clock>,
        ledger: &LedgerConfig,
        snapshot: PolicySnapshot,
    ) -> LedgerResult<Self>
    where
        B: LedgerStore + AuditLog + 'static,
    {
        let store: Arc<dyn LedgerStore> = backend.clone();
        let audit: Arc<dyn AuditLog> = backend;

        let accounts = AccountStore::new(store, clock).with_history_page_size(ledger.history_page_size);
        let policies = Arc::new(PolicyStore::new(snapshot)?);
        let notifier = BroadcastNotifier::new(ledger.notification_buffer);
        let outbox = Arc::new(Outbox::new(audit, Arc::new(notifier.clone())));
        let retry = RetryPolicy::from(&ledger.retry);

        Ok(Self {
            rules: RulesEngine::new(accounts.clone(), Arc::clone(&policies)),
            expiration: Arc::new(ExpirationManager::new(
                accounts.clone(),
                Arc::clone(&policies),
                Arc::clone(&outbox),
                retry,
            )),
            transfers: TransferBroker::new(accounts.clone(), Arc::clone(&policies)),
            admin: AdminService::new(accounts.clone(), Arc::clone(&policies), Arc::clone(&outbox)),
            accounts,
            policies,
            outbox,
            notifier,
            retry,
            sweep_interval: Duration::from_secs(ledger.sweep_interval_secs.max(1)),
            outbox_interval: Duration::from_secs(ledger.outbox_retry_secs.max(1)),
        })
    }

    /// Services over a fresh in-memory backend and the system clock.
    pub fn in_memory(ledger: &LedgerConfig, policies: &PolicyConfig) -> LedgerResult<Self> {
        Self::new(
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(SystemClock),
            ledger,
            policies,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{AccountKey, HistoryRange};
    use crate::policy::EventType;
    use crate::rules::AwardRequest;
    use moeda_shared::types::{DisciplineId, StudentId};

    #[tokio::test]
    async fn test_in_memory_services_award_and_read_back() {
        let services =
            LedgerServices::in_memory(&LedgerConfig::default(), &PolicyConfig::default()).unwrap();
        let key = AccountKey::new(StudentId::new(), DisciplineId::new());

        let outcome = services
            .rules
            .award(&AwardRequest {
                student_id: key.student_id,
                discipline_id: key.discipline_id,
                event_type: EventType::QuizCompleted,
                origin_event_id: "quiz-42".into(),
                grade: None,
            })
            .await
            .unwrap();

        assert_eq!(outcome.granted(), 5);
        let history = services
            .accounts
            .history(key, HistoryRange::all())
            .collect_all()
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(services.retry.max_attempts, 5);
    }
}
