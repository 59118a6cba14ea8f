//! Admin requests and outcomes.

use serde::{Deserialize, Serialize};

use moeda_shared::types::{DisciplineId, StudentId, TransactionId};

use crate::audit::{Actor, AuditLogEntry};
use crate::ledger::{AccountKey, Transaction};

/// Manual balance correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustRequest {
    /// Who is adjusting.
    pub actor: Actor,
    /// Target student.
    pub student_id: StudentId,
    /// Target discipline.
    pub discipline_id: DisciplineId,
    /// Signed amount; negative removes coins.
    pub amount: i64,
    /// Required for negative amounts.
    pub justification: Option<String>,
    /// Lets a negative adjustment take the balance below zero.
    #[serde(default)]
    pub allow_negative: bool,
    /// Idempotency key.
    pub origin_event_id: String,
}

impl AdjustRequest {
    /// The target account.
    #[must_use]
    pub fn account(&self) -> AccountKey {
        AccountKey::new(self.student_id, self.discipline_id)
    }
}

/// Cancellation of a purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    /// The spend transaction to cancel.
    pub transaction_id: TransactionId,
    /// Who is cancelling.
    pub actor: Actor,
    /// Why.
    pub reason: Option<String>,
}

/// Delivery status of the secondary effects of an admin action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideEffectReport {
    /// False when the audit entry is waiting in the outbox.
    pub audit_recorded: bool,
    /// False when the notification is waiting in the outbox, and on replays,
    /// which emit nothing.
    pub notification_sent: bool,
    /// True when the request repeated an origin event already applied.
    #[serde(default)]
    pub replayed: bool,
}

/// Result of an admin action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminOutcome {
    /// The ledger transaction of record.
    pub transaction: Transaction,
    /// The audit entry describing the action. On a replay this is the
    /// recorded entry, absent if it never reached the audit log.
    pub audit: Option<AuditLogEntry>,
    /// Secondary-effect delivery status.
    pub side_effects: SideEffectReport,
}
