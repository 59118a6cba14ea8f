//! Ledger error types.
//!
//! Every failure a ledger operation can report, from validation of the
//! request through optimistic-concurrency conflicts to storage faults.

use rust_decimal::Decimal;
use thiserror::Error;

use moeda_shared::types::{StudentId, TransactionId};

use super::types::AccountKey;

/// Errors that can occur during ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    // ========== Validation Errors ==========
    /// Amount must be strictly positive (or non-zero for adjustments).
    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    /// Transaction kind is not valid for the requested movement.
    #[error("Invalid transaction kind: {0}")]
    InvalidKind(String),

    /// Grade is outside the 0..=10 scale.
    #[error("Invalid grade: {0}")]
    InvalidGrade(Decimal),

    /// Negative adjustments need a written justification.
    #[error("A justification is required for negative adjustments")]
    MissingJustification,

    /// The policy snapshot failed validation.
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    // ========== Balance Errors ==========
    /// The account cannot cover the debit.
    #[error("Insufficient balance on {account}: requested {requested}, available {available}")]
    InsufficientBalance {
        /// The account being debited.
        account: AccountKey,
        /// Coins requested.
        requested: i64,
        /// Coins available.
        available: i64,
    },

    /// The award would exceed the student's period cap.
    #[error("Cap exceeded for student {student_id}: requested {requested}, headroom {headroom}")]
    CapExceeded {
        /// The student being awarded.
        student_id: StudentId,
        /// Coins requested by the rule.
        requested: i64,
        /// Coins left before reaching the cap.
        headroom: i64,
    },

    // ========== Lookup Errors ==========
    /// Account has never been written.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountKey),

    /// Transaction not found.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// No distribution rule is configured for the event type.
    #[error("No distribution rule for event type '{0}'")]
    RuleNotFound(String),

    // ========== Operation Errors ==========
    /// Transfers require discipline separation and distinct accounts.
    #[error("Transfer not applicable: {0}")]
    TransferNotApplicable(String),

    /// Only spend transactions can be cancelled.
    #[error("Transaction {0} cannot be cancelled")]
    NotCancellable(TransactionId),

    /// The transaction has already been reversed.
    #[error("Transaction {0} has already been cancelled")]
    AlreadyCancelled(TransactionId),

    // ========== Concurrency Errors ==========
    /// Another writer already recorded this origin event on the account.
    #[error("Duplicate origin event '{origin_event_id}' on {account}")]
    DuplicateEvent {
        /// The account written to.
        account: AccountKey,
        /// The repeated idempotency key.
        origin_event_id: String,
    },

    /// The account changed since it was read.
    #[error("Stale version for {account}: expected {expected}, got {actual}")]
    StaleVersion {
        /// The account written to.
        account: AccountKey,
        /// The version the writer read.
        expected: i64,
        /// The version found at commit time.
        actual: i64,
    },

    /// Retries on stale versions ran out.
    #[error("Concurrency retries exhausted after {attempts} attempts")]
    ConcurrencyExhausted {
        /// Attempts made, including the first.
        attempts: u32,
    },

    // ========== Storage Errors ==========
    /// Backend failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::InvalidKind(_) => "INVALID_KIND",
            Self::InvalidGrade(_) => "INVALID_GRADE",
            Self::MissingJustification => "MISSING_JUSTIFICATION",
            Self::InvalidPolicy(_) => "INVALID_POLICY",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::CapExceeded { .. } => "CAP_EXCEEDED",
            Self::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            Self::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            Self::RuleNotFound(_) => "RULE_NOT_FOUND",
            Self::TransferNotApplicable(_) => "TRANSFER_NOT_APPLICABLE",
            Self::NotCancellable(_) => "NOT_CANCELLABLE",
            Self::AlreadyCancelled(_) => "ALREADY_CANCELLED",
            Self::DuplicateEvent { .. } => "DUPLICATE_EVENT",
            Self::StaleVersion { .. } => "STALE_VERSION",
            Self::ConcurrencyExhausted { .. } => "CONCURRENCY_EXHAUSTED",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed requests
            Self::InvalidAmount(_)
            | Self::InvalidKind(_)
            | Self::InvalidGrade(_)
            | Self::MissingJustification
            | Self::InvalidPolicy(_) => 400,

            // 404 Not Found
            Self::AccountNotFound(_) | Self::TransactionNotFound(_) | Self::RuleNotFound(_) => 404,

            // 409 Conflict - concurrency and replay
            Self::DuplicateEvent { .. }
            | Self::StaleVersion { .. }
            | Self::ConcurrencyExhausted { .. }
            | Self::AlreadyCancelled(_) => 409,

            // 422 Unprocessable - business rules
            Self::InsufficientBalance { .. }
            | Self::CapExceeded { .. }
            | Self::TransferNotApplicable(_)
            | Self::NotCancellable(_) => 422,

            // 500 Internal Server Error
            Self::Storage(_) => 500,
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleVersion { .. })
    }
}
