//! A user's own mailbox: listings, read state, trash and draft resumption.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::access::resolve_access;
use crate::actor::{Actor, Participant};
use crate::attachments;
use crate::entity::{attachment, delivery, message, recipient, user, Folder, RecipientKind};
use crate::error::{Error, Result};
use crate::sanitize::snippet;

const SNIPPET_CHARS: usize = 120;
const REPLY_PREFIX: &str = "Re:";
const FORWARD_PREFIX: &str = "Fwd:";

/// One line of a folder listing.
#[derive(Debug, Clone, Serialize)]
pub struct MailboxEntry {
    pub delivery_id: i32,
    pub message_id: i32,
    pub thread_id: i32,
    pub folder: Folder,
    pub is_read: bool,
    pub is_draft: bool,
    /// When the message landed in this mailbox.
    pub created_at: DateTime<Utc>,
    pub subject: String,
    pub snippet: String,
    pub sender: Participant,
}

/// A draft as needed to resume editing it.
#[derive(Debug, Clone, Serialize)]
pub struct DraftContents {
    pub message_id: i32,
    pub thread_id: i32,
    pub parent_message_id: Option<i32>,
    pub subject: String,
    pub body_html: String,
    pub to: Vec<i32>,
    pub cc: Vec<i32>,
    pub bcc: Vec<i32>,
    pub attachments: Vec<attachment::Model>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyMode {
    Reply,
    ReplyAll,
    Forward,
}

/// Pre-filled compose fields for answering or forwarding a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyTemplate {
    pub to: Vec<i32>,
    pub cc: Vec<i32>,
    pub subject: String,
    pub thread_id: i32,
    pub parent_message_id: i32,
}

/// Mailbox operations on deliveries the caller owns.
#[derive(Debug, Clone)]
pub struct Mailbox {
    conn: DatabaseConnection,
}

impl Mailbox {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Live deliveries of `owner` in `folder`, newest first.
    pub async fn list_folder(&self, owner: &Actor, folder: Folder, limit: u64) -> Result<Vec<MailboxEntry>> {
        let rows = delivery::Entity::find()
            .find_also_related(message::Entity)
            .filter(delivery::Column::OwnerUserId.eq(owner.id))
            .filter(delivery::Column::Folder.eq(folder))
            .filter(delivery::Column::DeletedAt.is_null())
            .order_by_desc(delivery::Column::CreatedAt)
            .order_by_desc(delivery::Column::Id)
            .limit(limit)
            .all(&self.conn)
            .await?;

        let sender_ids: Vec<i32> = rows
            .iter()
            .filter_map(|(_, m)| m.as_ref().map(|m| m.sender_id))
            .collect();
        let senders: HashMap<i32, user::Model> = user::Entity::find()
            .filter(user::Column::Id.is_in(sender_ids))
            .all(&self.conn)
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();

        Ok(rows
            .into_iter()
            .filter_map(|(d, m)| {
                let m = m?;
                let sender = senders.get(&m.sender_id)?.clone();
                Some(MailboxEntry {
                    delivery_id: d.id,
                    message_id: m.id,
                    thread_id: m.thread_id,
                    folder: d.folder,
                    is_read: d.is_read,
                    is_draft: m.is_draft,
                    created_at: d.created_at,
                    snippet: snippet(&m.body_text, SNIPPET_CHARS),
                    subject: m.subject,
                    sender: sender.into(),
                })
            })
            .collect())
    }

    /// Unread live deliveries in the INBOX.
    pub async fn unread_count(&self, owner: &Actor) -> Result<u64> {
        Ok(delivery::Entity::find()
            .filter(delivery::Column::OwnerUserId.eq(owner.id))
            .filter(delivery::Column::Folder.eq(Folder::Inbox))
            .filter(delivery::Column::IsRead.eq(false))
            .filter(delivery::Column::DeletedAt.is_null())
            .count(&self.conn)
            .await?)
    }

    pub async fn mark_unread(&self, owner: &Actor, message_id: i32) -> Result<()> {
        self.update_own(owner, message_id, delivery::Column::IsRead, Expr::value(false))
            .await
    }

    pub async fn move_to_trash(&self, owner: &Actor, message_id: i32) -> Result<()> {
        self.update_own(owner, message_id, delivery::Column::Folder, Expr::value(Folder::Trash))
            .await?;
        debug!(message_id, owner_id = owner.id, "moved to trash");
        Ok(())
    }

    /// Moves a delivery back out of the trash: own drafts to DRAFTS, own sent
    /// mail to SENT, everything else to the INBOX. Returns the target folder.
    pub async fn restore(&self, owner: &Actor, message_id: i32) -> Result<Folder> {
        let message = message::Entity::find_by_id(message_id)
            .one(&self.conn)
            .await?
            .ok_or(Error::NotFound)?;
        let target = restore_target(&message, owner.id);
        self.update_own(owner, message_id, delivery::Column::Folder, Expr::value(target))
            .await?;
        Ok(target)
    }

    async fn update_own(
        &self,
        owner: &Actor,
        message_id: i32,
        column: delivery::Column,
        value: sea_orm::sea_query::SimpleExpr,
    ) -> Result<()> {
        let result = delivery::Entity::update_many()
            .col_expr(column, value)
            .filter(delivery::Column::MessageId.eq(message_id))
            .filter(delivery::Column::OwnerUserId.eq(owner.id))
            .filter(delivery::Column::DeletedAt.is_null())
            .exec(&self.conn)
            .await?;
        if result.rows_affected == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// A draft of `owner` that still sits in their DRAFTS folder.
    pub async fn load_draft(&self, owner: &Actor, draft_id: i32) -> Result<DraftContents> {
        let draft = message::Entity::find_by_id(draft_id)
            .filter(message::Column::SenderId.eq(owner.id))
            .filter(message::Column::IsDraft.eq(true))
            .one(&self.conn)
            .await?
            .ok_or(Error::NotFound)?;
        let in_drafts = delivery::Entity::find()
            .filter(delivery::Column::MessageId.eq(draft_id))
            .filter(delivery::Column::OwnerUserId.eq(owner.id))
            .filter(delivery::Column::Folder.eq(Folder::Drafts))
            .filter(delivery::Column::DeletedAt.is_null())
            .count(&self.conn)
            .await?;
        if in_drafts == 0 {
            return Err(Error::NotFound);
        }

        let rows = recipient::Entity::find()
            .filter(recipient::Column::MessageId.eq(draft_id))
            .order_by_asc(recipient::Column::Id)
            .all(&self.conn)
            .await?;
        let ids_of = |kind: RecipientKind| -> Vec<i32> {
            rows.iter().filter(|r| r.kind == kind).map(|r| r.user_id).collect()
        };

        Ok(DraftContents {
            message_id: draft.id,
            thread_id: draft.thread_id,
            parent_message_id: draft.parent_message_id,
            to: ids_of(RecipientKind::To),
            cc: ids_of(RecipientKind::Cc),
            bcc: ids_of(RecipientKind::Bcc),
            attachments: attachments::list_for_message(&self.conn, draft_id).await?,
            subject: draft.subject,
            body_html: draft.body_html,
        })
    }

    /// Recipients and subject for answering or forwarding a message the
    /// viewer may see. BCC entries are never carried over.
    pub async fn reply_targets(&self, viewer: &Actor, message_id: i32, mode: ReplyMode) -> Result<ReplyTemplate> {
        let message = message::Entity::find_by_id(message_id)
            .one(&self.conn)
            .await?
            .ok_or(Error::NotFound)?;
        resolve_access(&self.conn, viewer, &message)
            .await?
            .ok_or(Error::NotFound)?;

        let (to, cc) = match mode {
            ReplyMode::Reply => (vec![message.sender_id], Vec::new()),
            ReplyMode::Forward => (Vec::new(), Vec::new()),
            ReplyMode::ReplyAll => {
                let listed: Vec<(i32, RecipientKind)> = recipient::Entity::find()
                    .select_only()
                    .column(recipient::Column::UserId)
                    .column(recipient::Column::Kind)
                    .filter(recipient::Column::MessageId.eq(message_id))
                    .filter(recipient::Column::Kind.is_in([RecipientKind::To, RecipientKind::Cc]))
                    .order_by_asc(recipient::Column::Id)
                    .into_tuple()
                    .all(&self.conn)
                    .await?;
                reply_all(viewer.id, message.sender_id, &listed)
            }
        };

        let prefix = match mode {
            ReplyMode::Reply | ReplyMode::ReplyAll => REPLY_PREFIX,
            ReplyMode::Forward => FORWARD_PREFIX,
        };
        Ok(ReplyTemplate {
            to,
            cc,
            subject: prefixed(prefix, &message.subject),
            thread_id: message.thread_id,
            parent_message_id: message.id,
        })
    }
}

fn restore_target(message: &message::Model, owner_id: i32) -> Folder {
    match (message.sender_id == owner_id, message.is_draft) {
        (true, true) => Folder::Drafts,
        (true, false) => Folder::Sent,
        (false, _) => Folder::Inbox,
    }
}

/// TO: the sender unless it is the viewer, then the original TO. CC: the
/// original CC minus anyone already in TO. The viewer is never included.
fn reply_all(viewer_id: i32, sender_id: i32, listed: &[(i32, RecipientKind)]) -> (Vec<i32>, Vec<i32>) {
    let mut to = Vec::new();
    if sender_id != viewer_id {
        to.push(sender_id);
    }
    for (id, kind) in listed {
        if *kind == RecipientKind::To && *id != viewer_id && !to.contains(id) {
            to.push(*id);
        }
    }
    let mut cc: Vec<i32> = Vec::new();
    for (id, kind) in listed {
        if *kind == RecipientKind::Cc && *id != viewer_id && !to.contains(id) && !cc.contains(id) {
            cc.push(*id);
        }
    }
    (to, cc)
}

fn prefixed(prefix: &str, subject: &str) -> String {
    if subject.to_lowercase().starts_with(&prefix.to_lowercase()) {
        subject.to_string()
    } else {
        format!("{prefix} {subject}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RecipientKind::{Cc, To};

    #[test]
    fn reply_all_excludes_viewer_and_dedups_cc() {
        let listed = [(2, To), (3, To), (4, Cc), (2, Cc), (5, Cc)];
        assert_eq!(reply_all(5, 1, &listed), (vec![1, 2, 3], vec![4]));
    }

    #[test]
    fn reply_all_from_own_sent_mail_skips_self() {
        let listed = [(2, To), (3, Cc)];
        assert_eq!(reply_all(1, 1, &listed), (vec![2], vec![3]));
    }

    #[test]
    fn prefixes_once() {
        assert_eq!(prefixed("Re:", "Ausflug"), "Re: Ausflug");
        assert_eq!(prefixed("Re:", "RE: Ausflug"), "RE: Ausflug");
        assert_eq!(prefixed("Fwd:", "Re: Ausflug"), "Fwd: Re: Ausflug");
    }
}
