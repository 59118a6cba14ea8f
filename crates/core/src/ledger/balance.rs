//! Pure posting rules.
//!
//! Each function takes an account snapshot and returns the [`AccountWrite`]
//! that applies one movement to it: the next account state, the lots that
//! changed and the transaction to append. Nothing here touches storage, so
//! the same plans are committed by every backend.

use chrono::{DateTime, Utc};

use moeda_shared::types::{LotId, TransactionId};

use super::error::LedgerError;
use super::store::AccountWrite;
use super::types::{AccountSnapshot, Lot, LotAllocation, LotState, Transaction, TransactionKind};

/// Where the lots of a credit come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LotSource {
    /// No lot; the coins never expire.
    None,
    /// One new lot earned now.
    Fresh {
        /// Expiry of the new lot.
        expires_at: DateTime<Utc>,
    },
    /// Lots re-created from slices of other lots, keeping their dates.
    Inherited(Vec<LotAllocation>),
}

/// A credit to plan.
#[derive(Debug, Clone)]
pub struct CreditSpec {
    /// Coins to add (positive).
    pub amount: i64,
    /// Transaction kind; must be a credit kind.
    pub kind: TransactionKind,
    /// Idempotency key.
    pub origin_event_id: String,
    /// Lots attached to the credit.
    pub lots: LotSource,
    /// Set when the credit compensates an earlier transaction.
    pub reverses: Option<TransactionId>,
}

/// A debit to plan.
#[derive(Debug, Clone)]
pub struct DebitSpec {
    /// Coins to remove (positive).
    pub amount: i64,
    /// Transaction kind; must be a debit kind.
    pub kind: TransactionKind,
    /// Idempotency key.
    pub origin_event_id: String,
    /// Lets this debit take the balance below zero. Later debits without
    /// the flag are checked against the balance as usual.
    pub allow_negative: bool,
}

/// Outcome of planning a lot expiration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryPlan {
    /// The lot is due; commit this write.
    Expire(AccountWrite),
    /// The lot is already expired or consumed.
    AlreadySettled,
    /// The lot has not reached its expiry date.
    NotDue,
    /// An older live lot must expire first.
    BlockedByOlderLot,
}

/// Consumes `amount` from `lots` oldest first.
///
/// `lots` must be ordered by [`Lot::fifo_key`]. Returns the slices taken; a
/// lot that reaches zero moves to [`LotState::Consumed`]. Coins not covered by
/// lots are left for the caller to take from the unlotted balance.
pub fn consume_fifo(lots: &mut [Lot], amount: i64) -> Vec<LotAllocation> {
    let mut left = amount;
    let mut taken = Vec::new();

    for lot in lots.iter_mut().filter(|lot| lot.state.is_live()) {
        if left == 0 {
            break;
        }
        let slice = lot.remaining.min(left);
        if slice <= 0 {
            continue;
        }
        lot.remaining -= slice;
        if lot.remaining == 0 {
            lot.state = LotState::Consumed;
        }
        left -= slice;
        taken.push(LotAllocation {
            lot_id: lot.id,
            amount: slice,
            earned_at: lot.earned_at,
            expires_at: lot.expires_at,
        });
    }

    taken
}

/// Returns the oldest slices of `allocations` worth at most `amount` coins,
/// splitting the last slice if needed.
pub fn take_oldest(allocations: &[LotAllocation], amount: i64) -> Vec<LotAllocation> {
    let mut left = amount;
    let mut taken = Vec::new();
    for slice in allocations {
        if left <= 0 {
            break;
        }
        let part = slice.amount.min(left);
        taken.push(LotAllocation {
            amount: part,
            ..slice.clone()
        });
        left -= part;
    }
    taken
}

/// Plans a credit.
///
/// # Errors
///
/// Returns `InvalidAmount` for non-positive amounts and `InvalidKind` for
/// debit-only kinds or inherited lots worth more than the credit.
pub fn post_credit(
    snapshot: &AccountSnapshot,
    spec: CreditSpec,
    now: DateTime<Utc>,
) -> Result<AccountWrite, LedgerError> {
    if spec.amount <= 0 {
        return Err(LedgerError::InvalidAmount(spec.amount));
    }
    if !spec.kind.is_credit() {
        return Err(LedgerError::InvalidKind(spec.kind.to_string()));
    }

    let transaction_id = TransactionId::new();
    let key = snapshot.account.key;

    let new_lot = |earned_at, expires_at, amount| Lot {
        id: LotId::new(),
        account: key,
        source_transaction_id: transaction_id,
        earned_at,
        expires_at,
        amount,
        remaining: amount,
        state: LotState::Active,
    };

    let lots = match spec.lots {
        LotSource::None => Vec::new(),
        LotSource::Fresh { expires_at } => vec![new_lot(now, expires_at, spec.amount)],
        LotSource::Inherited(slices) => {
            let inherited: i64 = slices.iter().map(|slice| slice.amount).sum();
            if inherited > spec.amount {
                return Err(LedgerError::InvalidKind(format!(
                    "inherited lots ({inherited}) exceed credit ({})",
                    spec.amount
                )));
            }
            slices
                .iter()
                .filter(|slice| slice.amount > 0)
                .map(|slice| new_lot(slice.earned_at, slice.expires_at, slice.amount))
                .collect()
        }
    };

    let mut account = snapshot.account.clone();
    account.balance += spec.amount;
    account.version += 1;
    account.updated_at = now;

    let transaction = Transaction {
        id: transaction_id,
        account: key,
        kind: spec.kind,
        amount: spec.amount,
        origin_event_id: spec.origin_event_id,
        created_at: now,
        lot_id: lots.first().map(|lot| lot.id),
        account_version: account.version,
        allocations: lots
            .iter()
            .map(|lot| LotAllocation {
                lot_id: lot.id,
                amount: lot.amount,
                earned_at: lot.earned_at,
                expires_at: lot.expires_at,
            })
            .collect(),
        reverses: spec.reverses,
    };

    Ok(AccountWrite {
        expected_version: snapshot.account.version,
        account,
        lots,
        transaction: Some(transaction),
    })
}

/// Plans a debit, consuming lots oldest first before the unlotted balance.
///
/// # Errors
///
/// Returns `InvalidAmount`, `InvalidKind`, or `InsufficientBalance` when the
/// balance cannot cover the amount and negative balances are not allowed.
pub fn post_debit(
    snapshot: &AccountSnapshot,
    spec: DebitSpec,
    now: DateTime<Utc>,
) -> Result<AccountWrite, LedgerError> {
    if spec.amount <= 0 {
        return Err(LedgerError::InvalidAmount(spec.amount));
    }
    if !spec.kind.is_debit() {
        return Err(LedgerError::InvalidKind(spec.kind.to_string()));
    }

    let key = snapshot.account.key;
    if spec.amount > snapshot.account.balance && !spec.allow_negative {
        return Err(LedgerError::InsufficientBalance {
            account: key,
            requested: spec.amount,
            available: snapshot.account.balance.max(0),
        });
    }

    let mut lots = snapshot.lots.clone();
    let allocations = consume_fifo(&mut lots, spec.amount);
    let touched: Vec<Lot> = lots
        .into_iter()
        .filter(|lot| allocations.iter().any(|slice| slice.lot_id == lot.id))
        .collect();

    let mut account = snapshot.account.clone();
    account.balance -= spec.amount;
    account.version += 1;
    // never cleared: storage only accepts negative balances on flagged accounts
    account.allow_negative |= spec.allow_negative;
    account.updated_at = now;

    let transaction = Transaction {
        id: TransactionId::new(),
        account: key,
        kind: spec.kind,
        amount: -spec.amount,
        origin_event_id: spec.origin_event_id,
        created_at: now,
        lot_id: allocations.first().map(|slice| slice.lot_id),
        account_version: account.version,
        allocations,
        reverses: None,
    };

    Ok(AccountWrite {
        expected_version: snapshot.account.version,
        account,
        lots: touched,
        transaction: Some(transaction),
    })
}

/// Plans the expiration of one lot as of `now`.
///
/// Expiry never takes the balance below zero: if the account is already
/// short, only what the balance can cover is debited and the lot is closed.
pub fn post_expiry(snapshot: &AccountSnapshot, lot_id: LotId, now: DateTime<Utc>) -> ExpiryPlan {
    let Some(position) = snapshot.lots.iter().position(|lot| lot.id == lot_id) else {
        return ExpiryPlan::AlreadySettled;
    };
    let lot = &snapshot.lots[position];
    if !lot.state.is_live() {
        return ExpiryPlan::AlreadySettled;
    }
    if lot.expires_at > now {
        return ExpiryPlan::NotDue;
    }
    if snapshot
        .lots
        .iter()
        .any(|other| other.state.is_live() && other.remaining > 0 && other.fifo_key() < lot.fifo_key())
    {
        return ExpiryPlan::BlockedByOlderLot;
    }

    let debit = lot.remaining.min(snapshot.account.balance.max(0));

    let mut expired = lot.clone();
    expired.remaining = 0;
    expired.state = LotState::Expired;

    let mut account = snapshot.account.clone();
    account.balance -= debit;
    account.version += 1;
    account.updated_at = now;

    let transaction = (debit > 0).then(|| Transaction {
        id: TransactionId::new(),
        account: account.key,
        kind: TransactionKind::Expire,
        amount: -debit,
        origin_event_id: format!("expire:{lot_id}"),
        created_at: now,
        lot_id: Some(lot_id),
        account_version: account.version,
        allocations: vec![LotAllocation {
            lot_id,
            amount: debit,
            earned_at: lot.earned_at,
            expires_at: lot.expires_at,
        }],
        reverses: None,
    });

    ExpiryPlan::Expire(AccountWrite {
        expected_version: snapshot.account.version,
        account,
        lots: vec![expired],
        transaction,
    })
}

/// Plans moving an active lot to `nearing_expiry`.
///
/// Returns `None` when the lot is unknown or was already noticed.
pub fn post_notice(
    snapshot: &AccountSnapshot,
    lot_id: LotId,
    now: DateTime<Utc>,
) -> Option<AccountWrite> {
    let lot = snapshot.lots.iter().find(|lot| lot.id == lot_id)?;
    if lot.state != LotState::Active {
        return None;
    }

    let mut noticed = lot.clone();
    noticed.state = LotState::NearingExpiry;

    let mut account = snapshot.account.clone();
    account.version += 1;
    account.updated_at = now;

    Some(AccountWrite {
        expected_version: snapshot.account.version,
        account,
        lots: vec![noticed],
        transaction: None,
    })
}
