//! Courses belong to a school and own students and a send window.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::Serialize;

/// A course. `(school_id, name)` is unique.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "courses")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    /// Only empty for rows created before schools existed.
    pub school_id: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::school::Entity",
        from = "Column::SchoolId",
        to = "super::school::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    School,
    #[sea_orm(has_many = "super::teacher_course::Entity")]
    TeacherCourse,
    #[sea_orm(has_one = "super::course_send_window::Entity")]
    SendWindow,
}

impl Related<super::school::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::School.def()
    }
}

impl Related<super::teacher_course::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TeacherCourse.def()
    }
}

impl Related<super::course_send_window::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SendWindow.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
