//! Policy validation errors.

use thiserror::Error;

use crate::ledger::LedgerError;

/// Errors raised while building or replacing a policy snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// A rule or policy field is out of range.
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// The event type name is not recognised.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

impl From<PolicyError> for LedgerError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::InvalidPolicy(msg) => Self::InvalidPolicy(msg),
            PolicyError::UnknownEventType(name) => Self::RuleNotFound(name),
        }
    }
}
