//! `SeaORM` Entity for lots table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "lots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub student_id: Uuid,
    pub discipline_id: Uuid,
    pub source_transaction_id: Uuid,
    pub earned_at: DateTimeWithTimeZone,
    pub expires_at: DateTimeWithTimeZone,
    pub amount: i64,
    pub remaining: i64,
    pub state: String,
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
