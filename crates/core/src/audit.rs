//! Staff actions and the immutable audit log.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use moeda_shared::types::{ActorId, AuditEntryId, TransactionId};

use crate::ledger::{AccountKey, LedgerError, LedgerResult};

/// Role of a staff member acting on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StaffRole {
    /// School administrator.
    #[serde(rename = "administrador")]
    Administrator,
    /// Pedagogical coordinator.
    #[serde(rename = "coordenador")]
    Coordinator,
    /// Teacher.
    #[serde(rename = "professor")]
    Teacher,
}

impl StaffRole {
    /// Returns the wire name of the role.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Administrator => "administrador",
            Self::Coordinator => "coordenador",
            Self::Teacher => "professor",
        }
    }
}

impl fmt::Display for StaffRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StaffRole {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "administrador" | "administrator" | "admin" => Ok(Self::Administrator),
            "coordenador" | "coordinator" => Ok(Self::Coordinator),
            "professor" | "teacher" => Ok(Self::Teacher),
            other => Err(LedgerError::InvalidKind(format!("unknown staff role '{other}'"))),
        }
    }
}

/// The staff member behind a manual operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Staff member id.
    pub id: ActorId,
    /// Role at the time of the action.
    pub role: StaffRole,
}

/// Manual operation recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
    /// Manual credit.
    Credit,
    /// Manual debit.
    Debit,
    /// Purchase cancellation.
    CancelPurchase,
}

impl AdminAction {
    /// Returns the storage name of the action.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
            Self::CancelPurchase => "cancel_purchase",
        }
    }
}

impl FromStr for AdminAction {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(Self::Credit),
            "debit" => Ok(Self::Debit),
            "cancel_purchase" => Ok(Self::CancelPurchase),
            other => Err(LedgerError::Storage(format!("unknown admin action '{other}'"))),
        }
    }
}

/// Immutable record of one manual ledger operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Entry id.
    pub id: AuditEntryId,
    /// Who acted.
    pub actor_id: ActorId,
    /// Their role.
    pub actor_role: StaffRole,
    /// What they did.
    pub action: AdminAction,
    /// The account affected.
    pub target_account: AccountKey,
    /// Signed amount applied to the account.
    pub amount: i64,
    /// Free-text justification or cancellation reason.
    pub justification: Option<String>,
    /// The ledger transaction produced by the action.
    pub transaction_id: TransactionId,
    /// When the action was recorded.
    pub created_at: DateTime<Utc>,
}

/// Append-only sink for audit entries.
#[async_trait]
pub trait AuditLog: Send + Sync + fmt::Debug {
    /// Stores an entry. Appending the same entry id twice is a no-op.
    async fn append(&self, entry: &AuditLogEntry) -> LedgerResult<()>;

    /// Entries targeting `key`, oldest first.
    async fn trail(&self, key: AccountKey) -> LedgerResult<Vec<AuditLogEntry>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("administrador", StaffRole::Administrator)]
    #[case("Coordenador", StaffRole::Coordinator)]
    #[case("teacher", StaffRole::Teacher)]
    fn test_role_parsing(#[case] input: &str, #[case] expected: StaffRole) {
        assert_eq!(input.parse::<StaffRole>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_role_rejected() {
        assert!("aluno".parse::<StaffRole>().is_err());
    }

    #[test]
    fn test_role_serializes_with_school_names() {
        assert_eq!(
            serde_json::to_string(&StaffRole::Coordinator).unwrap(),
            "\"coordenador\""
        );
    }

    #[test]
    fn test_action_round_trip() {
        for action in [AdminAction::Credit, AdminAction::Debit, AdminAction::CancelPurchase] {
            assert_eq!(action.as_str().parse::<AdminAction>().unwrap(), action);
        }
    }
}
