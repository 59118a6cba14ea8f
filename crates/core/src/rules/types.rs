//! Award requests and outcomes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use moeda_shared::types::{DisciplineId, StudentId, TransactionId};

use crate::ledger::{AccountKey, Transaction};
use crate::policy::EventType;

/// A qualifying student event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwardRequest {
    /// The student to reward.
    pub student_id: StudentId,
    /// The discipline the event happened in.
    pub discipline_id: DisciplineId,
    /// What happened.
    pub event_type: EventType,
    /// Idempotency key, typically the upstream event id.
    pub origin_event_id: String,
    /// Grade on the 0-10 scale, for graded events.
    #[serde(default)]
    pub grade: Option<Decimal>,
}

impl AwardRequest {
    /// The account the award is credited to.
    #[must_use]
    pub fn account(&self) -> AccountKey {
        AccountKey::new(self.student_id, self.discipline_id)
    }
}

/// Reported when an award was clipped by the period cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapExceededNotice {
    /// The student whose cap was reached.
    pub student_id: StudentId,
    /// The event that triggered the award.
    pub event_type: EventType,
    /// Coins the rule would have paid.
    pub requested: i64,
    /// Coins actually credited.
    pub granted: i64,
    /// The rule's cap.
    pub cap: i64,
    /// The cap window.
    pub period_days: u32,
    /// Coins already earned in the window before this award.
    pub earned_in_period: i64,
}

/// Result of an award.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwardOutcome {
    /// The credit, absent when nothing could be paid.
    pub transaction: Option<Transaction>,
    /// Present when the cap clipped the award.
    pub cap_notice: Option<CapExceededNotice>,
}

impl AwardOutcome {
    /// Coins credited by this award.
    #[must_use]
    pub fn granted(&self) -> i64 {
        self.transaction.as_ref().map_or(0, |tx| tx.amount)
    }
}

/// What an award paid, stored once per origin event.
///
/// Kept even when nothing was paid, so a resubmitted event gets the same
/// answer after the cap window has moved on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwardRecord {
    /// The credited account.
    pub account: AccountKey,
    /// The event the award answered.
    pub origin_event_id: String,
    /// The earn transaction, absent when the cap left nothing to pay.
    pub transaction_id: Option<TransactionId>,
    /// The notice returned when the award was clipped.
    pub cap_notice: Option<CapExceededNotice>,
    /// When the award was processed.
    pub recorded_at: DateTime<Utc>,
}
