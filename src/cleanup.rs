//! Tenant teardown.
//!
//! Every cleanup is built from the same steps, each a query returning a typed
//! id set:
//!
//! 1. the affected users,
//! 2. the messages they sent or were addressed in,
//! 3. the storage names of those messages' attachments,
//!
//! followed by deletes in dependency order inside one transaction. Attachment
//! bytes are not touched here; the caller removes them afterwards through
//! [`CleanupReport::purge_files`].

use std::collections::BTreeSet;
use std::sync::Arc;

use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QuerySelect, TransactionTrait,
};
use serde::Serialize;
use tracing::info;

use crate::attachments::{self, AttachmentStore};
use crate::clock::Clock;
use crate::directory::school_course_ids;
use crate::entity::{
    attachment, course, message, recipient, school, teacher_course, thread, user, Role,
};
use crate::error::Result;

/// A set of row ids.
pub type IdSet = BTreeSet<i32>;

/// What a cleanup removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub deleted_message_ids: Vec<i32>,
    /// Files the caller still has to remove from the attachment store.
    pub attachment_storage_names: Vec<String>,
    pub deleted_user_ids: Vec<i32>,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.deleted_message_ids.is_empty() && self.deleted_user_ids.is_empty()
    }

    /// Removes the reported files. Failures are logged and skipped; returns
    /// how many files were removed.
    pub async fn purge_files(&self, store: &dyn AttachmentStore) -> usize {
        attachments::purge(store, &self.attachment_storage_names).await
    }
}

/// Counts shown before a destructive cleanup is confirmed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupImpact {
    pub students: u64,
    pub teachers: u64,
    pub messages: u64,
}

impl CleanupImpact {
    pub fn is_empty(&self) -> bool {
        self.students == 0 && self.teachers == 0 && self.messages == 0
    }
}

#[derive(Debug, Clone)]
pub struct CascadeCleanup {
    conn: DatabaseConnection,
    clock: Arc<dyn Clock>,
}

impl CascadeCleanup {
    pub fn new(conn: DatabaseConnection, clock: Arc<dyn Clock>) -> Self {
        Self { conn, clock }
    }

    /// Deletes a course with its students, the teachers who teach nothing
    /// else, and all mail those users sent or received.
    pub async fn cleanup_course(&self, course_id: i32) -> Result<CleanupReport> {
        let txn = self.conn.begin().await?;

        let users: IdSet = students_of_courses(&txn, &[course_id])
            .await?
            .union(&sole_course_teachers(&txn, course_id).await?)
            .copied()
            .collect();
        let report = delete_closure(&txn, &users).await?;

        teacher_course::Entity::delete_many()
            .filter(teacher_course::Column::CourseId.eq(course_id))
            .exec(&txn)
            .await?;
        course::Entity::delete_by_id(course_id).exec(&txn).await?;

        txn.commit().await?;

        info!(
            course_id,
            users = report.deleted_user_ids.len(),
            messages = report.deleted_message_ids.len(),
            files = report.attachment_storage_names.len(),
            "course cleaned up"
        );
        Ok(report)
    }

    /// Deletes a school, its courses, every member and all their mail.
    pub async fn cleanup_school(&self, school_id: i32) -> Result<CleanupReport> {
        let txn = self.conn.begin().await?;

        let course_ids = school_course_ids(&txn, school_id).await?;
        let users = school_members(&txn, school_id, &course_ids).await?;
        let report = delete_closure(&txn, &users).await?;

        if !course_ids.is_empty() {
            teacher_course::Entity::delete_many()
                .filter(teacher_course::Column::CourseId.is_in(course_ids.iter().copied()))
                .exec(&txn)
                .await?;
            course::Entity::delete_many()
                .filter(course::Column::Id.is_in(course_ids.iter().copied()))
                .exec(&txn)
                .await?;
        }
        school::Entity::delete_by_id(school_id).exec(&txn).await?;

        txn.commit().await?;

        info!(
            school_id,
            courses = course_ids.len(),
            users = report.deleted_user_ids.len(),
            messages = report.deleted_message_ids.len(),
            files = report.attachment_storage_names.len(),
            "school cleaned up"
        );
        Ok(report)
    }

    /// Deletes the given users and all mail they sent or received.
    pub async fn cleanup_users(&self, user_ids: &[i32]) -> Result<CleanupReport> {
        let txn = self.conn.begin().await?;
        let existing: IdSet = user::Entity::find()
            .select_only()
            .column(user::Column::Id)
            .filter(user::Column::Id.is_in(user_ids.iter().copied()))
            .into_tuple::<i32>()
            .all(&txn)
            .await?
            .into_iter()
            .collect();
        let report = delete_closure(&txn, &existing).await?;
        txn.commit().await?;

        info!(
            users = report.deleted_user_ids.len(),
            messages = report.deleted_message_ids.len(),
            "users cleaned up"
        );
        Ok(report)
    }

    /// Purges accounts whose last valid day lies before today.
    pub async fn cleanup_expired_users(&self) -> Result<CleanupReport> {
        let today = self.clock.today();
        let txn = self.conn.begin().await?;
        let expired: IdSet = user::Entity::find()
            .select_only()
            .column(user::Column::Id)
            .filter(user::Column::ExpiresAt.is_not_null())
            .filter(user::Column::ExpiresAt.lt(today))
            .into_tuple::<i32>()
            .all(&txn)
            .await?
            .into_iter()
            .collect();
        let report = delete_closure(&txn, &expired).await?;
        txn.commit().await?;

        info!(%today, users = report.deleted_user_ids.len(), "expired users purged");
        Ok(report)
    }

    pub async fn course_impact(&self, course_id: i32) -> Result<CleanupImpact> {
        let students = students_of_courses(&self.conn, &[course_id]).await?;
        let teachers = teacher_course::Entity::find()
            .filter(teacher_course::Column::CourseId.eq(course_id))
            .count(&self.conn)
            .await?;
        let messages = sent_by(&self.conn, &students).await?;
        Ok(CleanupImpact {
            students: students.len() as u64,
            teachers,
            messages,
        })
    }

    pub async fn school_impact(&self, school_id: i32) -> Result<CleanupImpact> {
        let course_ids = school_course_ids(&self.conn, school_id).await?;
        let members = school_members(&self.conn, school_id, &course_ids).await?;
        let roles: Vec<Role> = user::Entity::find()
            .select_only()
            .column(user::Column::Role)
            .filter(user::Column::Id.is_in(members.iter().copied()))
            .into_tuple()
            .all(&self.conn)
            .await?;
        Ok(CleanupImpact {
            students: roles.iter().filter(|r| **r == Role::Student).count() as u64,
            teachers: roles.iter().filter(|r| **r == Role::Teacher).count() as u64,
            messages: sent_by(&self.conn, &members).await?,
        })
    }
}

/// Students enrolled in any of the courses.
pub(crate) async fn students_of_courses<C: ConnectionTrait>(conn: &C, course_ids: &[i32]) -> Result<IdSet> {
    if course_ids.is_empty() {
        return Ok(IdSet::new());
    }
    let ids: Vec<i32> = user::Entity::find()
        .select_only()
        .column(user::Column::Id)
        .filter(user::Column::Role.eq(Role::Student))
        .filter(user::Column::CourseId.is_in(course_ids.iter().copied()))
        .into_tuple()
        .all(conn)
        .await?;
    Ok(ids.into_iter().collect())
}

/// Teachers assigned to `course_id` and to no other course.
pub(crate) async fn sole_course_teachers<C: ConnectionTrait>(conn: &C, course_id: i32) -> Result<IdSet> {
    let assigned: IdSet = teacher_ids_of(conn, &[course_id]).await?;
    if assigned.is_empty() {
        return Ok(assigned);
    }
    let elsewhere: Vec<i32> = teacher_course::Entity::find()
        .select_only()
        .column(teacher_course::Column::UserId)
        .filter(teacher_course::Column::UserId.is_in(assigned.iter().copied()))
        .filter(teacher_course::Column::CourseId.ne(course_id))
        .into_tuple()
        .all(conn)
        .await?;
    let elsewhere: IdSet = elsewhere.into_iter().collect();
    Ok(assigned.difference(&elsewhere).copied().collect())
}

/// Users with role teacher assigned to any of the courses.
async fn teacher_ids_of<C: ConnectionTrait>(conn: &C, course_ids: &[i32]) -> Result<IdSet> {
    if course_ids.is_empty() {
        return Ok(IdSet::new());
    }
    let assigned: Vec<i32> = teacher_course::Entity::find()
        .select_only()
        .column(teacher_course::Column::UserId)
        .filter(teacher_course::Column::CourseId.is_in(course_ids.iter().copied()))
        .into_tuple()
        .all(conn)
        .await?;
    let teachers: Vec<i32> = user::Entity::find()
        .select_only()
        .column(user::Column::Id)
        .filter(user::Column::Role.eq(Role::Teacher))
        .filter(user::Column::Id.is_in(assigned))
        .into_tuple()
        .all(conn)
        .await?;
    Ok(teachers.into_iter().collect())
}

/// Staff of the school, everyone enrolled in its courses and every teacher
/// teaching one of them.
pub(crate) async fn school_members<C: ConnectionTrait>(
    conn: &C,
    school_id: i32,
    course_ids: &[i32],
) -> Result<IdSet> {
    let direct: Vec<i32> = user::Entity::find()
        .select_only()
        .column(user::Column::Id)
        .filter(user::Column::SchoolId.eq(school_id))
        .into_tuple()
        .all(conn)
        .await?;

    let enrolled: Vec<i32> = if course_ids.is_empty() {
        Vec::new()
    } else {
        user::Entity::find()
            .select_only()
            .column(user::Column::Id)
            .filter(user::Column::CourseId.is_in(course_ids.iter().copied()))
            .into_tuple()
            .all(conn)
            .await?
    };

    let mut members: IdSet = direct.into_iter().chain(enrolled).collect();
    members.extend(teacher_ids_of(conn, course_ids).await?);
    Ok(members)
}

/// Messages sent by or addressed to any of the users.
pub(crate) async fn messages_touching<C: ConnectionTrait>(conn: &C, users: &IdSet) -> Result<IdSet> {
    if users.is_empty() {
        return Ok(IdSet::new());
    }
    let sent: Vec<i32> = message::Entity::find()
        .select_only()
        .column(message::Column::Id)
        .filter(message::Column::SenderId.is_in(users.iter().copied()))
        .into_tuple()
        .all(conn)
        .await?;
    let received: Vec<i32> = recipient::Entity::find()
        .select_only()
        .column(recipient::Column::MessageId)
        .filter(recipient::Column::UserId.is_in(users.iter().copied()))
        .distinct()
        .into_tuple()
        .all(conn)
        .await?;
    Ok(sent.into_iter().chain(received).collect())
}

async fn attachment_names<C: ConnectionTrait>(conn: &C, messages: &IdSet) -> Result<Vec<String>> {
    if messages.is_empty() {
        return Ok(Vec::new());
    }
    Ok(attachment::Entity::find()
        .select_only()
        .column(attachment::Column::StorageName)
        .filter(attachment::Column::MessageId.is_in(messages.iter().copied()))
        .into_tuple()
        .all(conn)
        .await?)
}

async fn sent_by<C: ConnectionTrait>(conn: &C, users: &IdSet) -> Result<u64> {
    if users.is_empty() {
        return Ok(0);
    }
    Ok(message::Entity::find()
        .filter(message::Column::SenderId.is_in(users.iter().copied()))
        .count(conn)
        .await?)
}

/// Deletes the users, every message touching them and threads left empty.
/// Recipient, delivery, attachment and audit rows go with their message.
async fn delete_closure<C: ConnectionTrait>(conn: &C, users: &IdSet) -> Result<CleanupReport> {
    let messages = messages_touching(conn, users).await?;
    let storage_names = attachment_names(conn, &messages).await?;

    if !messages.is_empty() {
        let threads: Vec<i32> = message::Entity::find()
            .select_only()
            .column(message::Column::ThreadId)
            .filter(message::Column::Id.is_in(messages.iter().copied()))
            .distinct()
            .into_tuple()
            .all(conn)
            .await?;

        message::Entity::delete_many()
            .filter(message::Column::Id.is_in(messages.iter().copied()))
            .exec(conn)
            .await?;

        let still_used: Vec<i32> = message::Entity::find()
            .select_only()
            .column(message::Column::ThreadId)
            .filter(message::Column::ThreadId.is_in(threads.iter().copied()))
            .distinct()
            .into_tuple()
            .all(conn)
            .await?;
        let empty: IdSet = threads
            .into_iter()
            .filter(|t| !still_used.contains(t))
            .collect();
        if !empty.is_empty() {
            thread::Entity::delete_many()
                .filter(thread::Column::Id.is_in(empty))
                .exec(conn)
                .await?;
        }
    }

    if !users.is_empty() {
        user::Entity::delete_many()
            .filter(user::Column::Id.is_in(users.iter().copied()))
            .exec(conn)
            .await?;
    }

    Ok(CleanupReport {
        deleted_message_ids: messages.into_iter().collect(),
        attachment_storage_names: storage_names,
        deleted_user_ids: users.iter().copied().collect(),
    })
}
