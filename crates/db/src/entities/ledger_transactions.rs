//! `SeaORM` Entity for ledger_transactions table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "ledger_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub student_id: Uuid,
    pub discipline_id: Uuid,
    pub kind: String,
    pub amount: i64,
    pub origin_event_id: String,
    pub lot_id: Option<Uuid>,
    pub account_version: i64,
    #[sea_orm(column_type = "JsonBinary")]
    pub allocations: Json,
    pub reverses: Option<Uuid>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::accounts::Entity",
        from = "(Column::StudentId, Column::DisciplineId)",
        to = "(super::accounts::Column::StudentId, super::accounts::Column::DisciplineId)"
    )]
    Accounts,
}

impl Related<super::accounts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Accounts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
