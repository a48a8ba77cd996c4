//! Tenant and identity store: schools, courses, users and teacher
//! assignments.

use std::sync::Arc;

use chrono::NaiveDate;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QuerySelect, Set,
};
use sea_orm::sea_query::OnConflict;
use serde::Deserialize;
use tracing::info;

use crate::actor::Actor;
use crate::clock::Clock;
use crate::config::Capabilities;
use crate::entity::{course, school, teacher_course, user, user::Role};
use crate::error::{Error, Result};

/// Input for [`Directory::create_user`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub course_id: Option<i32>,
    pub school_id: Option<i32>,
    /// Hash produced by the host application's password hasher.
    pub pw_hash: String,
    pub expires_at: Option<NaiveDate>,
}

/// Creates and looks up tenants and accounts.
#[derive(Debug, Clone)]
pub struct Directory {
    conn: DatabaseConnection,
    clock: Arc<dyn Clock>,
    capabilities: Capabilities,
}

impl Directory {
    pub fn new(conn: DatabaseConnection, clock: Arc<dyn Clock>, capabilities: Capabilities) -> Self {
        Self {
            conn,
            clock,
            capabilities,
        }
    }

    pub async fn create_school(&self, name: &str, domain: &str) -> Result<school::Model> {
        let name = required("school name", name)?;
        let domain = required("school domain", domain)?.to_lowercase();
        let school = school::ActiveModel {
            name: Set(name),
            domain: Set(domain),
            created_at: Set(self.clock.now_db()),
            ..Default::default()
        }
        .insert(&self.conn)
        .await
        .map_err(|e| Error::from_insert(e, "school"))?;

        info!(school_id = school.id, "school created");
        Ok(school)
    }

    pub async fn create_course(&self, school_id: i32, name: &str) -> Result<course::Model> {
        let name = required("course name", name)?;
        school::Entity::find_by_id(school_id)
            .one(&self.conn)
            .await?
            .ok_or(Error::NotFound)?;

        let course = course::ActiveModel {
            name: Set(name),
            school_id: Set(Some(school_id)),
            created_at: Set(self.clock.now_db()),
            ..Default::default()
        }
        .insert(&self.conn)
        .await
        .map_err(|e| Error::from_insert(e, "course"))?;

        info!(school_id, course_id = course.id, "course created");
        Ok(course)
    }

    /// Creates an account. Students need a course, staff need a school.
    pub async fn create_user(&self, new: NewUser) -> Result<user::Model> {
        let username = required("username", &new.username)?;
        let display_name = required("display name", &new.display_name)?;
        match new.role {
            Role::Student if new.course_id.is_none() => {
                return Err(Error::Validation("students need a course".into()))
            }
            Role::Teacher | Role::SchoolAdmin if new.school_id.is_none() => {
                return Err(Error::Validation("staff accounts need a school".into()))
            }
            _ => {}
        }

        let user = user::ActiveModel {
            username: Set(username),
            display_name: Set(display_name),
            role: Set(new.role),
            course_id: Set(new.course_id),
            school_id: Set(new.school_id),
            pw_hash: Set(new.pw_hash),
            expires_at: Set(new.expires_at),
            created_at: Set(self.clock.now_db()),
            ..Default::default()
        }
        .insert(&self.conn)
        .await
        .map_err(|e| Error::from_insert(e, "user"))?;

        info!(user_id = user.id, role = ?user.role, "user created");
        Ok(user)
    }

    /// Creates a student on behalf of `actor`, who must be allowed to create
    /// accounts and to manage the target course.
    pub async fn create_student_as(&self, actor: &Actor, new: NewUser) -> Result<user::Model> {
        if new.role != Role::Student {
            return Err(Error::Validation("only student accounts can be delegated".into()));
        }
        if !self.capabilities.can_create_accounts(actor.role) {
            return Err(Error::NotFound);
        }
        let course_id = new.course_id.ok_or(Error::NotFound)?;
        if !can_manage_course(&self.conn, actor, course_id).await? {
            return Err(Error::NotFound);
        }
        self.create_user(new).await
    }

    /// Links a teacher to a course. Assigning twice is a no-op.
    ///
    /// A teacher belongs to at most one school, so courses of other schools
    /// are refused.
    pub async fn assign_teacher_course(&self, teacher_id: i32, course_id: i32) -> Result<()> {
        let teacher = user::Entity::find_by_id(teacher_id)
            .filter(user::Column::Role.eq(Role::Teacher))
            .one(&self.conn)
            .await?
            .ok_or(Error::NotFound)?;
        let course = course::Entity::find_by_id(course_id)
            .one(&self.conn)
            .await?
            .ok_or(Error::NotFound)?;

        if let (Some(teacher_school), Some(course_school)) = (teacher.school_id, course.school_id) {
            if teacher_school != course_school {
                return Err(Error::Validation(
                    "a teacher can only teach courses of their own school".into(),
                ));
            }
        }

        teacher_course::Entity::insert(teacher_course::ActiveModel {
            user_id: Set(teacher_id),
            course_id: Set(course_id),
        })
        .on_conflict(
            OnConflict::columns([teacher_course::Column::UserId, teacher_course::Column::CourseId])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(&self.conn)
        .await?;

        Ok(())
    }

    pub async fn unassign_teacher_course(&self, teacher_id: i32, course_id: i32) -> Result<()> {
        teacher_course::Entity::delete_many()
            .filter(teacher_course::Column::UserId.eq(teacher_id))
            .filter(teacher_course::Column::CourseId.eq(course_id))
            .exec(&self.conn)
            .await?;
        Ok(())
    }

    pub async fn teacher_course_ids(&self, teacher_id: i32) -> Result<Vec<i32>> {
        teacher_course_ids(&self.conn, teacher_id).await
    }

    pub async fn find_user(&self, user_id: i32) -> Result<Option<user::Model>> {
        Ok(user::Entity::find_by_id(user_id).one(&self.conn).await?)
    }

    /// The user if it exists and has not expired today.
    pub async fn find_active_user(&self, user_id: i32) -> Result<Option<user::Model>> {
        Ok(self
            .find_user(user_id)
            .await?
            .filter(|u| u.is_active_on(self.clock.today())))
    }

    pub async fn courses_of_school(&self, school_id: i32) -> Result<Vec<course::Model>> {
        Ok(course::Entity::find()
            .filter(course::Column::SchoolId.eq(school_id))
            .all(&self.conn)
            .await?)
    }
}

fn required(what: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Validation(format!("{what} is required")));
    }
    Ok(value.to_string())
}

/// Courses a teacher teaches. Falls back to the legacy single `course_id`
/// when the teacher has no assignment rows.
pub(crate) async fn teacher_course_ids<C: ConnectionTrait>(conn: &C, teacher_id: i32) -> Result<Vec<i32>> {
    let ids: Vec<i32> = teacher_course::Entity::find()
        .select_only()
        .column(teacher_course::Column::CourseId)
        .filter(teacher_course::Column::UserId.eq(teacher_id))
        .into_tuple()
        .all(conn)
        .await?;
    if !ids.is_empty() {
        return Ok(ids);
    }

    let legacy = user::Entity::find_by_id(teacher_id)
        .one(conn)
        .await?
        .and_then(|u| u.course_id);
    Ok(legacy.into_iter().collect())
}

/// Ids of the courses of a school.
pub(crate) async fn school_course_ids<C: ConnectionTrait>(conn: &C, school_id: i32) -> Result<Vec<i32>> {
    Ok(course::Entity::find()
        .select_only()
        .column(course::Column::Id)
        .filter(course::Column::SchoolId.eq(school_id))
        .into_tuple()
        .all(conn)
        .await?)
}

/// Whether `actor` may run teacher tools (send window, supervision, account
/// creation) for a course: admins always, school admins within their school,
/// teachers for courses they teach.
pub(crate) async fn can_manage_course<C: ConnectionTrait>(
    conn: &C,
    actor: &Actor,
    course_id: i32,
) -> Result<bool> {
    match actor.role {
        Role::Admin => Ok(course::Entity::find_by_id(course_id).one(conn).await?.is_some()),
        Role::SchoolAdmin => {
            let my_school = user::Entity::find_by_id(actor.id)
                .one(conn)
                .await?
                .and_then(|u| u.school_id);
            let course_school = course::Entity::find_by_id(course_id)
                .one(conn)
                .await?
                .and_then(|c| c.school_id);
            Ok(matches!((my_school, course_school), (Some(a), Some(b)) if a == b))
        }
        Role::Teacher => Ok(teacher_course_ids(conn, actor.id).await?.contains(&course_id)),
        Role::Student => Ok(false),
    }
}
