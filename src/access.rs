//! Message view authorization and BCC redaction.
//!
//! A viewer reaches a message through exactly one [`AccessPath`]:
//!
//! 1. an admin always does, through their own delivery if they have one and
//!    through a read-only override otherwise;
//! 2. anyone else through a live delivery they own;
//! 3. failing that, teachers and school admins through the supervisory
//!    fallback over sent student mail of courses they oversee. A student's
//!    unsent draft is never supervised.
//!
//! Everything else is [`Error::NotFound`], whether the message exists or not.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use tracing::debug;

use crate::actor::{Actor, Participant};
use crate::attachments;
use crate::config::Capabilities;
use crate::directory::{can_manage_course, teacher_course_ids};
use crate::entity::{attachment, course, delivery, message, recipient, user, Folder, RecipientKind, Role};
use crate::error::{Error, Result};
use crate::sanitize::snippet;

const SNIPPET_CHARS: usize = 120;

/// Granularity of a supervisory view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum SupervisoryScope {
    /// A teacher overseeing one of their courses.
    Course(i32),
    /// A school administrator overseeing their school.
    School(i32),
}

/// How the viewer is authorized to see a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccessPath {
    Owned { delivery_id: i32, folder: Folder },
    AdminOverride,
    Supervisory(SupervisoryScope),
}

/// Where the viewer is looking at the message from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViewFolder {
    Mailbox(Folder),
    /// The course-wide supervisory listing. Not a folder anyone owns.
    Course,
}

/// Result of a successful authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MessageAccess {
    pub message_id: i32,
    pub path: AccessPath,
}

impl MessageAccess {
    /// Only a delivery the viewer owns may be marked, trashed or restored.
    pub fn can_mutate(&self) -> bool {
        matches!(self.path, AccessPath::Owned { .. })
    }

    pub fn is_supervisory(&self) -> bool {
        matches!(self.path, AccessPath::Supervisory(_))
    }

    pub fn view_folder(&self) -> ViewFolder {
        match self.path {
            AccessPath::Owned { folder, .. } => ViewFolder::Mailbox(folder),
            AccessPath::AdminOverride => ViewFolder::Mailbox(Folder::Inbox),
            AccessPath::Supervisory(_) => ViewFolder::Course,
        }
    }

    /// The mailbox folder to highlight. Supervisory views show as SENT.
    pub fn display_folder(&self) -> Folder {
        match self.view_folder() {
            ViewFolder::Mailbox(folder) => folder,
            ViewFolder::Course => Folder::Sent,
        }
    }
}

/// Recipients of a message grouped by field, BCC already redacted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecipientLists {
    pub to: Vec<Participant>,
    pub cc: Vec<Participant>,
    pub bcc: Vec<Participant>,
}

impl RecipientLists {
    pub fn len(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&mut self, kind: RecipientKind, participant: Participant) {
        match kind {
            RecipientKind::To => self.to.push(participant),
            RecipientKind::Cc => self.cc.push(participant),
            RecipientKind::Bcc => self.bcc.push(participant),
        }
    }
}

/// Whether a viewer may see one BCC entry.
pub fn bcc_visible(role: Role, viewer_is_sender: bool, capabilities: &Capabilities) -> bool {
    match role {
        Role::Admin => true,
        Role::Student => viewer_is_sender,
        Role::Teacher | Role::SchoolAdmin => viewer_is_sender || capabilities.can_see_bcc(role),
    }
}

/// A message opened for reading.
#[derive(Debug, Clone, Serialize)]
pub struct OpenedMessage {
    pub message: message::Model,
    pub sender: Participant,
    pub access: MessageAccess,
    pub recipients: RecipientLists,
    pub attachments: Vec<attachment::Model>,
}

/// One row of the supervisory overview of a course.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisedMessage {
    pub message_id: i32,
    pub thread_id: i32,
    pub subject: String,
    pub snippet: String,
    pub created_at: DateTime<Utc>,
    pub sender: Participant,
    /// SENT, or TRASH when the student binned their copy.
    pub sender_folder: Folder,
    pub recipients: RecipientLists,
}

/// Decides who may see which message.
#[derive(Debug, Clone)]
pub struct MessageAuthorizer {
    conn: DatabaseConnection,
    capabilities: Capabilities,
}

impl MessageAuthorizer {
    pub fn new(conn: DatabaseConnection, capabilities: Capabilities) -> Self {
        Self { conn, capabilities }
    }

    /// The access path of `viewer` to a message, or `None`.
    pub async fn can_view(&self, viewer: &Actor, message_id: i32) -> Result<Option<MessageAccess>> {
        let Some(message) = message::Entity::find_by_id(message_id).one(&self.conn).await? else {
            return Ok(None);
        };
        resolve_access(&self.conn, viewer, &message).await
    }

    pub async fn can_access_message(&self, viewer: &Actor, message_id: i32) -> Result<bool> {
        Ok(self.can_view(viewer, message_id).await?.is_some())
    }

    /// Recipients of a message as `viewer` may see them.
    pub async fn recipients_for_message(
        &self,
        message_id: i32,
        viewer: &Actor,
        viewer_is_sender: bool,
    ) -> Result<RecipientLists> {
        let mut lists = load_recipient_lists(&self.conn, &[message_id], |kind| {
            kind != RecipientKind::Bcc || bcc_visible(viewer.role, viewer_is_sender, &self.capabilities)
        })
        .await?;
        Ok(lists.remove(&message_id).unwrap_or_default())
    }

    /// Authorizes and loads a message. A viewer's own delivery is marked read;
    /// supervisory and admin-override views change nothing.
    pub async fn open_message(&self, viewer: &Actor, message_id: i32) -> Result<OpenedMessage> {
        let message = message::Entity::find_by_id(message_id)
            .one(&self.conn)
            .await?
            .ok_or(Error::NotFound)?;
        let access = resolve_access(&self.conn, viewer, &message)
            .await?
            .ok_or(Error::NotFound)?;

        let sender = user::Entity::find_by_id(message.sender_id)
            .one(&self.conn)
            .await?
            .ok_or(Error::NotFound)?;
        let recipients = self
            .recipients_for_message(message_id, viewer, message.sender_id == viewer.id)
            .await?;
        let attachments = attachments::list_for_message(&self.conn, message_id).await?;

        if let AccessPath::Owned { delivery_id, .. } = access.path {
            delivery::ActiveModel {
                id: Set(delivery_id),
                is_read: Set(true),
                ..Default::default()
            }
            .update(&self.conn)
            .await?;
        }

        debug!(message_id, viewer_id = viewer.id, path = ?access.path, "message opened");
        Ok(OpenedMessage {
            message,
            sender: sender.into(),
            access,
            recipients,
            attachments,
        })
    }

    /// The attachment row if `viewer` may see its message.
    pub async fn attachment_for_download(
        &self,
        viewer: &Actor,
        attachment_id: i32,
    ) -> Result<attachment::Model> {
        let attachment = attachment::Entity::find_by_id(attachment_id)
            .one(&self.conn)
            .await?
            .ok_or(Error::NotFound)?;
        if !self.can_access_message(viewer, attachment.message_id).await? {
            return Err(Error::NotFound);
        }
        Ok(attachment)
    }

    pub async fn can_manage_course(&self, viewer: &Actor, course_id: i32) -> Result<bool> {
        can_manage_course(&self.conn, viewer, course_id).await
    }

    /// Sent mail of the students of a course, newest first.
    pub async fn supervised_messages(
        &self,
        viewer: &Actor,
        course_id: i32,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<SupervisedMessage>> {
        if !self.can_manage_course(viewer, course_id).await? {
            return Err(Error::NotFound);
        }

        let students: HashMap<i32, user::Model> = user::Entity::find()
            .filter(user::Column::Role.eq(Role::Student))
            .filter(user::Column::CourseId.eq(course_id))
            .all(&self.conn)
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();
        if students.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<(message::Model, Option<delivery::Model>)> = message::Entity::find()
            .find_also_related(delivery::Entity)
            .filter(message::Column::IsDraft.eq(false))
            .filter(message::Column::SenderId.is_in(students.keys().copied()))
            .filter(
                Expr::col((delivery::Entity, delivery::Column::OwnerUserId))
                    .equals((message::Entity, message::Column::SenderId)),
            )
            .filter(delivery::Column::Folder.is_in([Folder::Sent, Folder::Trash]))
            .order_by_desc(message::Column::CreatedAt)
            .order_by_desc(message::Column::Id)
            .limit(limit)
            .offset(offset)
            .all(&self.conn)
            .await?;

        let ids: Vec<i32> = rows.iter().map(|(m, _)| m.id).collect();
        let can_see_bcc = bcc_visible(viewer.role, false, &self.capabilities);
        let mut recipients =
            load_recipient_lists(&self.conn, &ids, |kind| kind != RecipientKind::Bcc || can_see_bcc)
                .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(message, sender_copy)| {
                let sender = students.get(&message.sender_id)?.clone();
                Some(SupervisedMessage {
                    message_id: message.id,
                    thread_id: message.thread_id,
                    snippet: snippet(&message.body_text, SNIPPET_CHARS),
                    subject: message.subject,
                    created_at: message.created_at,
                    sender: sender.into(),
                    sender_folder: sender_copy.map_or(Folder::Sent, |d| d.folder),
                    recipients: recipients.remove(&message.id).unwrap_or_default(),
                })
            })
            .collect())
    }
}

/// Resolution order: own live delivery, admin override, supervisory fallback.
pub(crate) async fn resolve_access<C: ConnectionTrait>(
    conn: &C,
    viewer: &Actor,
    message: &message::Model,
) -> Result<Option<MessageAccess>> {
    let grant = |path| {
        Some(MessageAccess {
            message_id: message.id,
            path,
        })
    };

    if let Some(own) = delivery::Entity::find()
        .filter(delivery::Column::MessageId.eq(message.id))
        .filter(delivery::Column::OwnerUserId.eq(viewer.id))
        .filter(delivery::Column::DeletedAt.is_null())
        .order_by_asc(delivery::Column::Id)
        .one(conn)
        .await?
    {
        return Ok(grant(AccessPath::Owned {
            delivery_id: own.id,
            folder: own.folder,
        }));
    }

    match viewer.role {
        Role::Admin => Ok(grant(AccessPath::AdminOverride)),
        Role::Student => Ok(None),
        Role::Teacher | Role::SchoolAdmin => Ok(supervisory_scope(conn, viewer, message)
            .await?
            .and_then(|scope| grant(AccessPath::Supervisory(scope)))),
    }
}

/// Supervision covers sent mail of students only; drafts stay private.
async fn supervisory_scope<C: ConnectionTrait>(
    conn: &C,
    viewer: &Actor,
    message: &message::Model,
) -> Result<Option<SupervisoryScope>> {
    if message.is_draft {
        return Ok(None);
    }
    let Some(sender) = user::Entity::find_by_id(message.sender_id).one(conn).await? else {
        return Ok(None);
    };
    let Some(sender_course) = sender.course_id.filter(|_| sender.role == Role::Student) else {
        return Ok(None);
    };

    match viewer.role {
        Role::Teacher => {
            let taught = teacher_course_ids(conn, viewer.id).await?;
            Ok(taught
                .contains(&sender_course)
                .then_some(SupervisoryScope::Course(sender_course)))
        }
        Role::SchoolAdmin => {
            let my_school = user::Entity::find_by_id(viewer.id)
                .one(conn)
                .await?
                .and_then(|u| u.school_id);
            let sender_school = course::Entity::find_by_id(sender_course)
                .one(conn)
                .await?
                .and_then(|c| c.school_id);
            Ok(match (my_school, sender_school) {
                (Some(mine), Some(theirs)) if mine == theirs => Some(SupervisoryScope::School(mine)),
                _ => None,
            })
        }
        Role::Admin | Role::Student => Ok(None),
    }
}

/// Recipient lists of several messages, keeping entries for which `keep`
/// holds. Each list is ordered by display name.
pub(crate) async fn load_recipient_lists<C, F>(
    conn: &C,
    message_ids: &[i32],
    keep: F,
) -> Result<HashMap<i32, RecipientLists>>
where
    C: ConnectionTrait,
    F: Fn(RecipientKind) -> bool,
{
    if message_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = recipient::Entity::find()
        .find_also_related(user::Entity)
        .filter(recipient::Column::MessageId.is_in(message_ids.iter().copied()))
        .order_by_asc(user::Column::DisplayName)
        .order_by_asc(recipient::Column::Id)
        .all(conn)
        .await?;

    let mut lists: HashMap<i32, RecipientLists> = HashMap::new();
    for (row, user) in rows {
        let Some(user) = user else { continue };
        if keep(row.kind) {
            lists.entry(row.message_id).or_default().push(row.kind, user.into());
        }
    }
    Ok(lists)
}
