//! Transfer and spend requests and receipts.

use serde::{Deserialize, Serialize};

use moeda_shared::types::{DisciplineId, StudentId};

use crate::ledger::{AccountKey, Transaction};

/// Move coins between two of a student's disciplines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// The student owning both accounts.
    pub student_id: StudentId,
    /// Source discipline.
    pub from: DisciplineId,
    /// Destination discipline.
    pub to: DisciplineId,
    /// Coins taken from the source, fee included.
    pub amount: i64,
    /// Idempotency key.
    pub origin_event_id: String,
}

impl TransferRequest {
    /// Source account.
    #[must_use]
    pub fn source(&self) -> AccountKey {
        AccountKey::new(self.student_id, self.from)
    }

    /// Destination account.
    #[must_use]
    pub fn destination(&self) -> AccountKey {
        AccountKey::new(self.student_id, self.to)
    }
}

/// The committed legs of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Debit on the source account.
    pub transfer_out: Transaction,
    /// Credit on the destination account.
    pub transfer_in: Transaction,
    /// Coins kept by the fee pool.
    pub fee: i64,
    /// Credit on the fee pool, absent when the fee rounds to zero.
    pub fee_credit: Option<Transaction>,
}

/// Spend coins on points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendRequest {
    /// The buyer.
    pub student_id: StudentId,
    /// The discipline the points belong to.
    pub discipline_id: DisciplineId,
    /// Coins to spend.
    pub amount: i64,
    /// Idempotency key, typically the purchase id.
    pub origin_event_id: String,
}

impl SpendRequest {
    /// The discipline account of the purchase.
    #[must_use]
    pub fn account(&self) -> AccountKey {
        AccountKey::new(self.student_id, self.discipline_id)
    }
}

/// The debits a purchase produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendReceipt {
    /// One spend transaction per account debited.
    pub transactions: Vec<Transaction>,
    /// True when the student's accounts were treated as one pool.
    pub pooled: bool,
}

impl SpendReceipt {
    /// Coins spent in total.
    #[must_use]
    pub fn total(&self) -> i64 {
        -self.transactions.iter().map(|tx| tx.amount).sum::<i64>()
    }
}
