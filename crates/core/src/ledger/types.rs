//! Ledger domain types: accounts, transactions and lots.
//!
//! Amounts are integers in the smallest coin unit. Transactions are signed:
//! credits are positive, debits negative.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use moeda_shared::types::{DisciplineId, LotId, StudentId, TransactionId};

use super::error::LedgerError;

/// Identifies one coin account: a student's balance in one discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountKey {
    /// The owning student.
    pub student_id: StudentId,
    /// The discipline the balance belongs to.
    pub discipline_id: DisciplineId,
}

impl AccountKey {
    /// The system-owned account that collects transfer fees.
    pub const FEE_POOL: Self = Self {
        student_id: StudentId::SYSTEM,
        discipline_id: DisciplineId::SYSTEM,
    };

    /// Creates an account key.
    #[must_use]
    pub const fn new(student_id: StudentId, discipline_id: DisciplineId) -> Self {
        Self {
            student_id,
            discipline_id,
        }
    }

    /// Returns true for the fee-pool account.
    #[must_use]
    pub fn is_fee_pool(&self) -> bool {
        *self == Self::FEE_POOL
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.student_id, self.discipline_id)
    }
}

/// What kind of movement a transaction records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Coins awarded for schoolwork (or fees collected by the system).
    Earn,
    /// Coins spent on points.
    Spend,
    /// Manual staff correction, either sign.
    Adjust,
    /// Incoming leg of an inter-discipline transfer.
    TransferIn,
    /// Outgoing leg of an inter-discipline transfer.
    TransferOut,
    /// Coins removed because their lot reached its expiry date.
    Expire,
}

impl TransactionKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Earn,
        Self::Spend,
        Self::Adjust,
        Self::TransferIn,
        Self::TransferOut,
        Self::Expire,
    ];

    /// Returns true if this kind may carry a positive amount.
    #[must_use]
    pub fn is_credit(self) -> bool {
        matches!(self, Self::Earn | Self::Adjust | Self::TransferIn)
    }

    /// Returns true if this kind may carry a negative amount.
    #[must_use]
    pub fn is_debit(self) -> bool {
        matches!(
            self,
            Self::Spend | Self::Adjust | Self::TransferOut | Self::Expire
        )
    }

    /// Returns the storage name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Earn => "earn",
            Self::Spend => "spend",
            Self::Adjust => "adjust",
            Self::TransferIn => "transfer_in",
            Self::TransferOut => "transfer_out",
            Self::Expire => "expire",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| LedgerError::InvalidKind(s.to_string()))
    }
}

/// A slice of a lot consumed (or restored) by a transaction.
///
/// The lot's dates travel with the slice so that transfers and cancellations
/// can recreate lots with the original expiry clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotAllocation {
    /// The lot the coins came from.
    pub lot_id: LotId,
    /// Coins taken from the lot (positive).
    pub amount: i64,
    /// When the lot was earned.
    pub earned_at: DateTime<Utc>,
    /// When the lot expires.
    pub expires_at: DateTime<Utc>,
}

/// An immutable ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction ID.
    pub id: TransactionId,
    /// The account the transaction belongs to.
    pub account: AccountKey,
    /// Movement kind.
    pub kind: TransactionKind,
    /// Signed amount: positive credits, negative debits.
    pub amount: i64,
    /// Caller-supplied idempotency key, unique per account.
    pub origin_event_id: String,
    /// When the transaction was recorded.
    pub created_at: DateTime<Utc>,
    /// The lot created (credits) or first consumed (debits), if any.
    pub lot_id: Option<LotId>,
    /// The account version this transaction produced.
    pub account_version: i64,
    /// Lot slices consumed by a debit or restored by a credit.
    pub allocations: Vec<LotAllocation>,
    /// The transaction this one compensates, if it is a cancellation.
    pub reverses: Option<TransactionId>,
}

impl Transaction {
    /// Returns true if the transaction adds coins.
    #[must_use]
    pub fn is_credit(&self) -> bool {
        self.amount > 0
    }
}

/// Lifecycle of a lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotState {
    /// Spendable, not yet close to expiry.
    Active,
    /// Spendable, owner has been warned that it expires soon.
    NearingExpiry,
    /// Removed by the expiration sweep.
    Expired,
    /// Fully spent or transferred away.
    Consumed,
}

impl LotState {
    /// All states, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::Active,
        Self::NearingExpiry,
        Self::Expired,
        Self::Consumed,
    ];

    /// Returns true if the lot still holds spendable coins.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Active | Self::NearingExpiry)
    }

    /// Returns the storage name of the state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::NearingExpiry => "nearing_expiry",
            Self::Expired => "expired",
            Self::Consumed => "consumed",
        }
    }
}

impl FromStr for LotState {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| LedgerError::Storage(format!("unknown lot state '{s}'")))
    }
}

/// A batch of earned coins with its own validity window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    /// Lot ID.
    pub id: LotId,
    /// The account holding the lot.
    pub account: AccountKey,
    /// The credit that created the lot.
    pub source_transaction_id: TransactionId,
    /// When the coins were earned; FIFO order key.
    pub earned_at: DateTime<Utc>,
    /// When the remaining coins expire.
    pub expires_at: DateTime<Utc>,
    /// Coins originally in the lot.
    pub amount: i64,
    /// Coins not yet consumed.
    pub remaining: i64,
    /// Lifecycle state.
    pub state: LotState,
}

impl Lot {
    /// FIFO ordering key: oldest first, id breaks ties.
    #[must_use]
    pub fn fifo_key(&self) -> (DateTime<Utc>, LotId) {
        (self.earned_at, self.id)
    }
}

/// Materialized account state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The account key.
    pub key: AccountKey,
    /// Current balance.
    pub balance: i64,
    /// Monotonically increasing mutation counter. Zero means "never written".
    pub version: i64,
    /// Set by a staff override; allows the balance to go below zero.
    pub allow_negative: bool,
    /// When the account was first written.
    pub created_at: DateTime<Utc>,
    /// When the account was last written.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// An empty account that has not been persisted yet.
    #[must_use]
    pub fn open(key: AccountKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            balance: 0,
            version: 0,
            allow_negative: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// An account together with its live lots (oldest first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Account state.
    pub account: Account,
    /// Live lots ordered by `earned_at`.
    pub lots: Vec<Lot>,
}

impl AccountSnapshot {
    /// Snapshot of an account that has never been written.
    #[must_use]
    pub fn empty(key: AccountKey, now: DateTime<Utc>) -> Self {
        Self {
            account: Account::open(key, now),
            lots: Vec::new(),
        }
    }

    /// Sum of `remaining` over live lots.
    #[must_use]
    pub fn lotted_balance(&self) -> i64 {
        self.lots.iter().map(|lot| lot.remaining).sum()
    }

    /// Part of the balance not covered by any lot.
    #[must_use]
    pub fn unlotted_balance(&self) -> i64 {
        self.account.balance - self.lotted_balance()
    }
}

/// Half-open time range `[from, to)` for history queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRange {
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub to: Option<DateTime<Utc>>,
}

impl HistoryRange {
    /// The whole history.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            from: None,
            to: None,
        }
    }

    /// Returns true if `instant` falls inside the range.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| instant >= from) && self.to.is_none_or(|to| instant < to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_kind_signs() {
        assert!(TransactionKind::Earn.is_credit());
        assert!(!TransactionKind::Earn.is_debit());
        assert!(TransactionKind::Adjust.is_credit());
        assert!(TransactionKind::Adjust.is_debit());
        assert!(TransactionKind::Expire.is_debit());
        assert!(!TransactionKind::Spend.is_credit());
    }

    #[test]
    fn test_kind_round_trips_through_storage_name() {
        for kind in TransactionKind::ALL {
            assert_eq!(kind.as_str().parse::<TransactionKind>().unwrap(), kind);
        }
        assert!(matches!(
            "ganho".parse::<TransactionKind>(),
            Err(LedgerError::InvalidKind(_))
        ));
    }

    #[test]
    fn test_kind_serde_names() {
        assert_eq!(
            serde_json::to_string(&TransactionKind::TransferOut).unwrap(),
            "\"transfer_out\""
        );
    }

    #[test]
    fn test_lot_state_liveness() {
        assert!(LotState::Active.is_live());
        assert!(LotState::NearingExpiry.is_live());
        assert!(!LotState::Expired.is_live());
        assert!(!LotState::Consumed.is_live());
    }

    #[test]
    fn test_fee_pool_key() {
        assert!(AccountKey::FEE_POOL.is_fee_pool());
        assert!(!AccountKey::new(StudentId::new(), DisciplineId::new()).is_fee_pool());
    }

    #[test]
    fn test_history_range_contains() {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let range = HistoryRange {
            from: Some(start),
            to: Some(start + Duration::days(1)),
        };
        assert!(range.contains(start));
        assert!(range.contains(start + Duration::hours(23)));
        assert!(!range.contains(start + Duration::days(1)));
        assert!(!range.contains(start - Duration::seconds(1)));
        assert!(HistoryRange::all().contains(start));
    }
}
