//! Users of every role.

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// The four roles of the system.
///
/// Role-dependent rules (visibility, authorization, BCC redaction, send
/// gating) match on this enum exhaustively.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[sea_orm(string_value = "student")]
    Student,
    #[sea_orm(string_value = "teacher")]
    Teacher,
    #[sea_orm(string_value = "schooladmin")]
    SchoolAdmin,
    #[sea_orm(string_value = "admin")]
    Admin,
}

/// A user account.
///
/// Students carry `course_id`; teachers and school admins carry `school_id`
/// (teachers may also carry a legacy single `course_id`). Usernames are unique
/// per course for students, per school for staff and globally for admins.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub course_id: Option<i32>,
    pub school_id: Option<i32>,
    /// Opaque password hash produced by an external hasher.
    #[serde(skip_serializing)]
    pub pw_hash: String,
    /// Last day on which the account is valid.
    pub expires_at: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl Model {
    /// An account stays usable through the whole of its `expires_at` day.
    pub fn is_active_on(&self, today: NaiveDate) -> bool {
        self.expires_at.map_or(true, |last_day| last_day >= today)
    }
}

/// Filter matching users that are not expired on `today`.
pub fn active_on(today: NaiveDate) -> sea_orm::Condition {
    sea_orm::Condition::any()
        .add(Column::ExpiresAt.is_null())
        .add(Column::ExpiresAt.gte(today))
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::course::Entity",
        from = "Column::CourseId",
        to = "super::course::Column::Id",
        on_update = "NoAction",
        on_delete = "SetNull"
    )]
    Course,
    #[sea_orm(
        belongs_to = "super::school::Entity",
        from = "Column::SchoolId",
        to = "super::school::Column::Id",
        on_update = "NoAction",
        on_delete = "SetNull"
    )]
    School,
}

impl Related<super::course::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Course.def()
    }
}

impl Related<super::school::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::School.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
