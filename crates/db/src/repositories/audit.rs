//! PostgreSQL implementation of [`AuditLog`].

use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};

use moeda_core::audit::{AuditLog, AuditLogEntry};
use moeda_core::ledger::{AccountKey, LedgerResult};

use super::ledger::PgLedgerStore;
use super::mapping::{audit_model, db_err};
use crate::entities::audit_log;

#[async_trait]
impl AuditLog for PgLedgerStore {
    async fn append(&self, entry: &AuditLogEntry) -> LedgerResult<()> {
        audit_log::Entity::insert(audit_model(entry))
            .on_conflict(
                OnConflict::column(audit_log::Column::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn trail(&self, key: AccountKey) -> LedgerResult<Vec<AuditLogEntry>> {
        audit_log::Entity::find()
            .filter(audit_log::Column::StudentId.eq(key.student_id.into_inner()))
            .filter(audit_log::Column::DisciplineId.eq(key.discipline_id.into_inner()))
            .order_by_asc(audit_log::Column::CreatedAt)
            .order_by_asc(audit_log::Column::Id)
            .all(self.connection())
            .await
            .map_err(db_err)?
            .into_iter()
            .map(AuditLogEntry::try_from)
            .collect()
    }
}
