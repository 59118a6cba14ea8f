//! Staff overrides.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use moeda_shared::types::{AuditEntryId, TransactionId};

use super::types::{AdjustRequest, AdminOutcome, CancelRequest, SideEffectReport};
use crate::audit::{Actor, AdminAction, AuditLogEntry, StaffRole};
use crate::ledger::{AccountKey, AccountStore, LedgerError, LedgerResult, Transaction, TransactionKind};
use crate::notify::{NotificationEvent, NotificationKind, Outbox, Recipient};
use crate::policy::PolicyStore;

/// Manual ledger operations with audit trail.
#[derive(Debug)]
pub struct AdminService {
    accounts: AccountStore,
    policies: Arc<PolicyStore>,
    outbox: Arc<Outbox>,
}

impl AdminService {
    /// Creates the service.
    pub fn new(accounts: AccountStore, policies: Arc<PolicyStore>, outbox: Arc<Outbox>) -> Self {
        Self {
            accounts,
            policies,
            outbox,
        }
    }

    /// Credits or debits an account by hand.
    ///
    /// Negative amounts need a non-blank justification. Positive amounts get
    /// a lot from the discipline's expiration policy, like earned coins.
    pub async fn adjust(&self, request: &AdjustRequest) -> LedgerResult<AdminOutcome> {
        if request.amount == 0 {
            return Err(LedgerError::InvalidAmount(0));
        }
        let justification = request
            .justification
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string);
        if request.amount < 0 && justification.is_none() {
            return Err(LedgerError::MissingJustification);
        }

        let key = request.account();
        if let Some(prior) = self.accounts.find_by_origin(key, &request.origin_event_id).await? {
            return self.replay(prior, &request.origin_event_id).await;
        }

        let (transaction, action) = if request.amount > 0 {
            let lot_duration = self.policies.current().lot_duration_for(request.discipline_id);
            let tx = self
                .accounts
                .credit(
                    key,
                    request.amount,
                    TransactionKind::Adjust,
                    &request.origin_event_id,
                    lot_duration,
                )
                .await?;
            (tx, AdminAction::Credit)
        } else {
            let tx = self
                .accounts
                .debit_with(
                    key,
                    -request.amount,
                    TransactionKind::Adjust,
                    &request.origin_event_id,
                    request.allow_negative,
                )
                .await?;
            (tx, AdminAction::Debit)
        };

        info!(
            account = %key,
            amount = request.amount,
            actor_id = %request.actor.id,
            actor_role = %request.actor.role,
            "Manual balance adjustment"
        );

        let audit = self.audit_entry(request.actor, action, &transaction, justification);
        let recipients = vec![
            Recipient::Role(StaffRole::Administrator),
            Recipient::Role(StaffRole::Coordinator),
        ];
        let side_effects = self
            .publish(&audit, NotificationKind::BalanceAdjusted, recipients)
            .await;

        Ok(AdminOutcome {
            transaction,
            audit: Some(audit),
            side_effects,
        })
    }

    /// Cancels a purchase by crediting its amount back.
    ///
    /// Only spend transactions qualify, and each at most once. The refund is
    /// an `adjust` credit that re-creates the lots the purchase consumed.
    pub async fn cancel_purchase(&self, request: &CancelRequest) -> LedgerResult<AdminOutcome> {
        let original = self.accounts.transaction(request.transaction_id).await?;
        if original.kind != TransactionKind::Spend {
            return Err(LedgerError::NotCancellable(original.id));
        }
        if self.accounts.reversal_of(original.id).await?.is_some() {
            return Err(LedgerError::AlreadyCancelled(original.id));
        }

        let refund = match self
            .accounts
            .restore(&original, &cancellation_origin(original.id))
            .await
        {
            Ok(tx) => tx,
            Err(LedgerError::DuplicateEvent { .. }) => {
                return Err(LedgerError::AlreadyCancelled(original.id));
            }
            Err(err) => return Err(err),
        };

        info!(
            account = %original.account,
            transaction_id = %original.id,
            refund = refund.amount,
            actor_id = %request.actor.id,
            "Purchase cancelled"
        );

        let reason = request
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string);
        let audit = self.audit_entry(request.actor, AdminAction::CancelPurchase, &refund, reason);
        let recipients = vec![
            Recipient::Student(original.account.student_id),
            Recipient::Role(StaffRole::Administrator),
            Recipient::Role(StaffRole::Coordinator),
        ];
        let side_effects = self
            .publish(&audit, NotificationKind::PurchaseCancelled, recipients)
            .await;

        Ok(AdminOutcome {
            transaction: refund,
            audit: Some(audit),
            side_effects,
        })
    }

    /// Audit entries for an account, oldest first.
    pub async fn audit_trail(&self, key: AccountKey) -> LedgerResult<Vec<AuditLogEntry>> {
        self.outbox.audit_log().trail(key).await
    }

    async fn replay(&self, prior: Transaction, origin_event_id: &str) -> LedgerResult<AdminOutcome> {
        if prior.kind != TransactionKind::Adjust {
            return Err(LedgerError::DuplicateEvent {
                account: prior.account,
                origin_event_id: origin_event_id.to_string(),
            });
        }
        let audit = self
            .audit_trail(prior.account)
            .await?
            .into_iter()
            .find(|entry| entry.transaction_id == prior.id);
        debug!(tx_id = %prior.id, audit_found = audit.is_some(), "Replaying adjustment");
        Ok(AdminOutcome {
            transaction: prior,
            side_effects: SideEffectReport {
                audit_recorded: audit.is_some(),
                notification_sent: false,
                replayed: true,
            },
            audit,
        })
    }

    fn audit_entry(
        &self,
        actor: Actor,
        action: AdminAction,
        transaction: &Transaction,
        justification: Option<String>,
    ) -> AuditLogEntry {
        AuditLogEntry {
            id: AuditEntryId::new(),
            actor_id: actor.id,
            actor_role: actor.role,
            action,
            target_account: transaction.account,
            amount: transaction.amount,
            justification,
            transaction_id: transaction.id,
            created_at: self.accounts.now(),
        }
    }

    async fn publish(
        &self,
        audit: &AuditLogEntry,
        kind: NotificationKind,
        recipients: Vec<Recipient>,
    ) -> SideEffectReport {
        let audit_recorded = self.outbox.record_audit(audit.clone()).await;
        let notification_sent = self.outbox.notify(NotificationEvent::new(
            kind,
            recipients,
            json!({
                "student_id": audit.target_account.student_id,
                "discipline_id": audit.target_account.discipline_id,
                "amount": audit.amount,
                "actor_id": audit.actor_id,
                "actor_role": audit.actor_role,
                "justification": audit.justification,
                "transaction_id": audit.transaction_id,
            }),
            audit.created_at,
        ));
        if !(audit_recorded && notification_sent) {
            warn!(
                transaction_id = %audit.transaction_id,
                audit_recorded,
                notification_sent,
                "Admin side effects deferred to outbox"
            );
        }
        SideEffectReport {
            audit_recorded,
            notification_sent,
            replayed: false,
        }
    }
}

/// Returns the id a cancellation refund would carry as origin.
#[must_use]
pub fn cancellation_origin(transaction_id: TransactionId) -> String {
    format!("cancel:{transaction_id}")
}
