use sea_orm::entity::prelude::*;
use serde::Serialize;

use super::recipient::RecipientKind;

/// A recipient of a logged message, with the field it was addressed in.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "mail_log_recipients")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub log_id: i32,
    pub user_id: i32,
    #[sea_orm(column_name = "type")]
    pub kind: RecipientKind,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::mail_log::Entity",
        from = "Column::LogId",
        to = "super::mail_log::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Log,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::mail_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Log.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
