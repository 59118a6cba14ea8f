//! Best-effort side effects with deferred retry.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{info, warn};

use super::event::{NotificationEvent, NotificationSink};
use crate::audit::{AuditLog, AuditLogEntry};

/// A side effect waiting for redelivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingEffect {
    /// An audit entry that could not be stored.
    Audit(AuditLogEntry),
    /// A notification that could not be published.
    Notify(NotificationEvent),
}

/// Delivers audit entries and notifications without ever failing the caller.
///
/// Failed deliveries are logged and queued; [`Outbox::redeliver`] retries
/// them. Ledger mutations never wait on, or get undone by, this queue.
#[derive(Debug)]
pub struct Outbox {
    audit: Arc<dyn AuditLog>,
    sink: Arc<dyn NotificationSink>,
    pending: Mutex<VecDeque<PendingEffect>>,
}

impl Outbox {
    /// Creates an outbox writing to `audit` and publishing to `sink`.
    pub fn new(audit: Arc<dyn AuditLog>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            audit,
            sink,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// The audit log behind the outbox.
    pub fn audit_log(&self) -> &Arc<dyn AuditLog> {
        &self.audit
    }

    /// Stores an audit entry. Returns false if it was queued for retry.
    pub async fn record_audit(&self, entry: AuditLogEntry) -> bool {
        match self.audit.append(&entry).await {
            Ok(()) => true,
            Err(err) => {
                warn!(audit_id = %entry.id, error = %err, "Audit write failed, queued for retry");
                self.enqueue(PendingEffect::Audit(entry));
                false
            }
        }
    }

    /// Publishes a notification. Returns false if it was queued for retry.
    pub fn notify(&self, event: NotificationEvent) -> bool {
        match self.sink.publish(&event) {
            Ok(()) => true,
            Err(err) => {
                warn!(event_id = %event.id, kind = ?event.kind, error = %err, "Notification failed, queued for retry");
                self.enqueue(PendingEffect::Notify(event));
                false
            }
        }
    }

    /// Number of effects waiting for redelivery.
    pub fn pending_len(&self) -> usize {
        self.queue().len()
    }

    /// Retries every queued effect once. Returns how many were delivered.
    pub async fn redeliver(&self) -> usize {
        let batch: Vec<PendingEffect> = self.queue().drain(..).collect();
        if batch.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        let mut failed = Vec::new();
        for effect in batch {
            let ok = match &effect {
                PendingEffect::Audit(entry) => self.audit.append(entry).await.is_ok(),
                PendingEffect::Notify(event) => self.sink.publish(event).is_ok(),
            };
            if ok {
                delivered += 1;
            } else {
                failed.push(effect);
            }
        }

        let still_pending = failed.len();
        self.queue().extend(failed);
        info!(delivered, still_pending, "Outbox redelivery finished");
        delivered
    }

    /// Redelivers queued effects every `interval`, forever.
    pub async fn run_periodic(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.pending_len() > 0 {
                self.redeliver().await;
            }
        }
    }

    fn enqueue(&self, effect: PendingEffect) {
        self.queue().push_back(effect);
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<PendingEffect>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AdminAction, StaffRole};
    use crate::ledger::{AccountKey, LedgerError, LedgerResult};
    use crate::notify::event::{NotificationKind, NotifyError};
    use async_trait::async_trait;
    use chrono::Utc;
    use moeda_shared::types::{ActorId, AuditEntryId, TransactionId};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Audit log that fails until switched on.
    #[derive(Debug, Default)]
    struct FlakyAudit {
        healthy: AtomicBool,
        stored: Mutex<Vec<AuditLogEntry>>,
    }

    #[async_trait]
    impl AuditLog for FlakyAudit {
        async fn append(&self, entry: &AuditLogEntry) -> LedgerResult<()> {
            if !self.healthy.load(Ordering::SeqCst) {
                return Err(LedgerError::Storage("audit offline".into()));
            }
            self.stored.lock().unwrap().push(entry.clone());
            Ok(())
        }

        async fn trail(&self, _key: AccountKey) -> LedgerResult<Vec<AuditLogEntry>> {
            Ok(self.stored.lock().unwrap().clone())
        }
    }

    #[derive(Debug)]
    struct ClosedSink;

    impl NotificationSink for ClosedSink {
        fn publish(&self, _event: &NotificationEvent) -> Result<(), NotifyError> {
            Err(NotifyError::Closed)
        }
    }

    fn entry() -> AuditLogEntry {
        AuditLogEntry {
            id: AuditEntryId::new(),
            actor_id: ActorId::new(),
            actor_role: StaffRole::Coordinator,
            action: AdminAction::Debit,
            target_account: AccountKey::FEE_POOL,
            amount: -5,
            justification: Some("typo".into()),
            transaction_id: TransactionId::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_failed_audit_is_redelivered() {
        let audit = Arc::new(FlakyAudit::default());
        let outbox = Outbox::new(audit.clone(), Arc::new(ClosedSink));

        assert!(!outbox.record_audit(entry()).await);
        assert_eq!(outbox.pending_len(), 1);

        assert_eq!(outbox.redeliver().await, 0);
        assert_eq!(outbox.pending_len(), 1);

        audit.healthy.store(true, Ordering::SeqCst);
        assert_eq!(outbox.redeliver().await, 1);
        assert_eq!(outbox.pending_len(), 0);
        assert_eq!(audit.stored.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_notification_is_queued() {
        let outbox = Outbox::new(Arc::new(FlakyAudit::default()), Arc::new(ClosedSink));
        let event = NotificationEvent::new(
            NotificationKind::PurchaseCancelled,
            vec![],
            serde_json::Value::Null,
            Utc::now(),
        );
        assert!(!outbox.notify(event.clone()));
        assert_eq!(outbox.queue().front(), Some(&PendingEffect::Notify(event)));
    }
}
