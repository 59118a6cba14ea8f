//! Conversions between entity models and ledger types.

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{DbErr, Set};

use moeda_core::audit::{AuditLogEntry, StaffRole};
use moeda_core::ledger::{
    Account, AccountKey, LedgerError, Lot, LotAllocation, LotState, Transaction, TransactionKind,
};
use moeda_core::rules::{AwardRecord, CapExceededNotice};
use moeda_shared::types::{
    ActorId, AuditEntryId, DisciplineId, LotId, StudentId, TransactionId,
};

use crate::entities::{accounts, audit_log, award_outcomes, ledger_transactions, lots};

/// Wraps a database failure.
pub(crate) fn db_err(err: DbErr) -> LedgerError {
    LedgerError::Storage(err.to_string())
}

fn utc(at: DateTime<FixedOffset>) -> DateTime<Utc> {
    at.with_timezone(&Utc)
}

fn key_of(student_id: uuid::Uuid, discipline_id: uuid::Uuid) -> AccountKey {
    AccountKey::new(
        StudentId::from_uuid(student_id),
        DisciplineId::from_uuid(discipline_id),
    )
}

impl From<accounts::Model> for Account {
    fn from(model: accounts::Model) -> Self {
        Self {
            key: key_of(model.student_id, model.discipline_id),
            balance: model.balance,
            version: model.version,
            allow_negative: model.allow_negative,
            created_at: utc(model.created_at),
            updated_at: utc(model.updated_at),
        }
    }
}

pub(crate) fn account_model(account: &Account) -> accounts::ActiveModel {
    accounts::ActiveModel {
        student_id: Set(account.key.student_id.into_inner()),
        discipline_id: Set(account.key.discipline_id.into_inner()),
        balance: Set(account.balance),
        version: Set(account.version),
        allow_negative: Set(account.allow_negative),
        created_at: Set(account.created_at.into()),
        updated_at: Set(account.updated_at.into()),
    }
}

impl TryFrom<lots::Model> for Lot {
    type Error = LedgerError;

    fn try_from(model: lots::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: LotId::from_uuid(model.id),
            account: key_of(model.student_id, model.discipline_id),
            source_transaction_id: TransactionId::from_uuid(model.source_transaction_id),
            earned_at: utc(model.earned_at),
            expires_at: utc(model.expires_at),
            amount: model.amount,
            remaining: model.remaining,
            state: model.state.parse::<LotState>()?,
        })
    }
}

pub(crate) fn lot_model(lot: &Lot) -> lots::ActiveModel {
    lots::ActiveModel {
        id: Set(lot.id.into_inner()),
        student_id: Set(lot.account.student_id.into_inner()),
        discipline_id: Set(lot.account.discipline_id.into_inner()),
        source_transaction_id: Set(lot.source_transaction_id.into_inner()),
        earned_at: Set(lot.earned_at.into()),
        expires_at: Set(lot.expires_at.into()),
        amount: Set(lot.amount),
        remaining: Set(lot.remaining),
        state: Set(lot.state.as_str().to_string()),
    }
}

impl TryFrom<ledger_transactions::Model> for Transaction {
    type Error = LedgerError;

    fn try_from(model: ledger_transactions::Model) -> Result<Self, Self::Error> {
        let allocations: Vec<LotAllocation> = serde_json::from_value(model.allocations)
            .map_err(|e| LedgerError::Storage(format!("corrupt allocations: {e}")))?;
        Ok(Self {
            id: TransactionId::from_uuid(model.id),
            account: key_of(model.student_id, model.discipline_id),
            kind: model
                .kind
                .parse::<TransactionKind>()
                .map_err(|e| LedgerError::Storage(e.to_string()))?,
            amount: model.amount,
            origin_event_id: model.origin_event_id,
            created_at: utc(model.created_at),
            lot_id: model.lot_id.map(LotId::from_uuid),
            account_version: model.account_version,
            allocations,
            reverses: model.reverses.map(TransactionId::from_uuid),
        })
    }
}

pub(crate) fn transaction_model(
    tx: &Transaction,
) -> Result<ledger_transactions::ActiveModel, LedgerError> {
    let allocations = serde_json::to_value(&tx.allocations)
        .map_err(|e| LedgerError::Storage(e.to_string()))?;
    Ok(ledger_transactions::ActiveModel {
        id: Set(tx.id.into_inner()),
        student_id: Set(tx.account.student_id.into_inner()),
        discipline_id: Set(tx.account.discipline_id.into_inner()),
        kind: Set(tx.kind.as_str().to_string()),
        amount: Set(tx.amount),
        origin_event_id: Set(tx.origin_event_id.clone()),
        lot_id: Set(tx.lot_id.map(LotId::into_inner)),
        account_version: Set(tx.account_version),
        allocations: Set(allocations),
        reverses: Set(tx.reverses.map(TransactionId::into_inner)),
        created_at: Set(tx.created_at.into()),
    })
}

impl TryFrom<award_outcomes::Model> for AwardRecord {
    type Error = LedgerError;

    fn try_from(model: award_outcomes::Model) -> Result<Self, Self::Error> {
        let cap_notice = model
            .cap_notice
            .map(serde_json::from_value::<CapExceededNotice>)
            .transpose()
            .map_err(|e| LedgerError::Storage(format!("corrupt cap notice: {e}")))?;
        Ok(Self {
            account: key_of(model.student_id, model.discipline_id),
            origin_event_id: model.origin_event_id,
            transaction_id: model.transaction_id.map(TransactionId::from_uuid),
            cap_notice,
            recorded_at: utc(model.recorded_at),
        })
    }
}

pub(crate) fn award_model(award: &AwardRecord) -> Result<award_outcomes::ActiveModel, LedgerError> {
    let cap_notice = award
        .cap_notice
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| LedgerError::Storage(e.to_string()))?;
    Ok(award_outcomes::ActiveModel {
        student_id: Set(award.account.student_id.into_inner()),
        discipline_id: Set(award.account.discipline_id.into_inner()),
        origin_event_id: Set(award.origin_event_id.clone()),
        transaction_id: Set(award.transaction_id.map(TransactionId::into_inner)),
        cap_notice: Set(cap_notice),
        recorded_at: Set(award.recorded_at.into()),
    })
}

impl TryFrom<audit_log::Model> for AuditLogEntry {
    type Error = LedgerError;

    fn try_from(model: audit_log::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: AuditEntryId::from_uuid(model.id),
            actor_id: ActorId::from_uuid(model.actor_id),
            actor_role: model
                .actor_role
                .parse::<StaffRole>()
                .map_err(|e| LedgerError::Storage(e.to_string()))?,
            action: model.action.parse()?,
            target_account: key_of(model.student_id, model.discipline_id),
            amount: model.amount,
            justification: model.justification,
            transaction_id: TransactionId::from_uuid(model.transaction_id),
            created_at: utc(model.created_at),
        })
    }
}

pub(crate) fn audit_model(entry: &AuditLogEntry) -> audit_log::ActiveModel {
    audit_log::ActiveModel {
        id: Set(entry.id.into_inner()),
        actor_id: Set(entry.actor_id.into_inner()),
        actor_role: Set(entry.actor_role.as_str().to_string()),
        action: Set(entry.action.as_str().to_string()),
        student_id: Set(entry.target_account.student_id.into_inner()),
        discipline_id: Set(entry.target_account.discipline_id.into_inner()),
        amount: Set(entry.amount),
        justification: Set(entry.justification.clone()),
        transaction_id: Set(entry.transaction_id.into_inner()),
        created_at: Set(entry.created_at.into()),
    }
}
