//! Message & delivery engine.
//!
//! One authored message fans out into the authored address list
//! (`recipients`), one mailbox placement per owner (`deliveries`) and, for
//! sent mail only, a content-free audit entry (`mail_logs`). All of it is
//! written in one transaction.

use std::collections::HashSet;
use std::sync::Arc;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::access::resolve_access;
use crate::actor::Actor;
use crate::attachments::{self, AttachmentStore, StagedAttachment, Upload};
use crate::clock::Clock;
use crate::config::AttachmentLimits;
use crate::entity::{
    attachment, delivery, mail_log, mail_log_recipient, message, recipient, thread, user, Folder,
    RecipientKind,
};
use crate::error::{Error, Result};
use crate::sanitize::{html_to_text, HtmlSanitizer};
use crate::send_window::{attachments_allowed_on, may_send_on};

const SUBJECT_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComposeAction {
    #[default]
    Send,
    Draft,
}

/// What the sender submitted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ComposeRequest {
    pub to: Vec<i32>,
    pub cc: Vec<i32>,
    pub bcc: Vec<i32>,
    pub subject: String,
    pub body_html: String,
    pub action: ComposeAction,
    pub parent_message_id: Option<i32>,
    pub thread_id: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ComposeOutcome {
    pub message_id: i32,
    pub thread_id: i32,
    pub is_draft: bool,
}

/// Disjoint TO/CC/BCC lists without the sender.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientSet {
    pub to: Vec<i32>,
    pub cc: Vec<i32>,
    pub bcc: Vec<i32>,
}

impl RecipientSet {
    /// Drops the sender and keeps only the first occurrence of every id,
    /// scanning TO, then CC, then BCC.
    pub fn normalize(sender_id: i32, to: &[i32], cc: &[i32], bcc: &[i32]) -> Self {
        let mut seen = HashSet::from([sender_id]);
        let mut keep = |ids: &[i32]| -> Vec<i32> {
            ids.iter().copied().filter(|id| seen.insert(*id)).collect()
        };
        let to = keep(to);
        let cc = keep(cc);
        let bcc = keep(bcc);
        Self { to, cc, bcc }
    }

    pub fn len(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every recipient with the field it was addressed in, TO first.
    pub fn tagged(&self) -> impl Iterator<Item = (i32, RecipientKind)> + '_ {
        tag(&self.to, RecipientKind::To)
            .chain(tag(&self.cc, RecipientKind::Cc))
            .chain(tag(&self.bcc, RecipientKind::Bcc))
    }
}

fn tag(ids: &[i32], kind: RecipientKind) -> impl Iterator<Item = (i32, RecipientKind)> + '_ {
    ids.iter().map(move |id| (*id, kind))
}

/// Trims the subject and enforces 1 to 200 characters.
pub fn validate_subject(subject: &str) -> Result<String> {
    let subject = subject.trim();
    let chars = subject.chars().count();
    if chars == 0 || chars > SUBJECT_MAX_CHARS {
        return Err(Error::InvalidSubject);
    }
    Ok(subject.to_string())
}

/// Composes, saves and sends messages.
#[derive(Debug, Clone)]
pub struct MailEngine {
    conn: DatabaseConnection,
    clock: Arc<dyn Clock>,
    sanitizer: Arc<dyn HtmlSanitizer>,
    limits: AttachmentLimits,
}

impl MailEngine {
    pub fn new(
        conn: DatabaseConnection,
        clock: Arc<dyn Clock>,
        sanitizer: Arc<dyn HtmlSanitizer>,
        limits: AttachmentLimits,
    ) -> Self {
        Self {
            conn,
            clock,
            sanitizer,
            limits,
        }
    }

    /// Creates a new message or draft.
    pub async fn compose(&self, sender: &Actor, request: ComposeRequest) -> Result<ComposeOutcome> {
        self.compose_or_update(sender, request, None).await
    }

    /// Rewrites an existing draft of `sender`, optionally sending it.
    ///
    /// Fails with [`Error::NotFound`] once the draft has been sent, so a draft
    /// can be sent at most once.
    pub async fn update_draft(
        &self,
        sender: &Actor,
        draft_id: i32,
        request: ComposeRequest,
    ) -> Result<ComposeOutcome> {
        self.compose_or_update(sender, request, Some(draft_id)).await
    }

    pub async fn compose_or_update(
        &self,
        sender: &Actor,
        request: ComposeRequest,
        draft_id: Option<i32>,
    ) -> Result<ComposeOutcome> {
        let prepared = self.prepare(sender, &request, draft_id, false).await?;
        self.commit(sender, &request, draft_id, prepared, &[]).await
    }

    /// Like [`compose_or_update`](Self::compose_or_update), with new files.
    ///
    /// Files are validated first, then written to `store`, then recorded in
    /// the same transaction as the message. Staged files are removed again if
    /// the transaction does not commit.
    pub async fn compose_with_attachments(
        &self,
        sender: &Actor,
        request: ComposeRequest,
        draft_id: Option<i32>,
        uploads: Vec<Upload>,
        store: &dyn AttachmentStore,
    ) -> Result<ComposeOutcome> {
        let prepared = self
            .prepare(sender, &request, draft_id, !uploads.is_empty())
            .await?;
        let staged = attachments::stage(store, &uploads, &self.limits).await?;
        match self.commit(sender, &request, draft_id, prepared, &staged).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                attachments::discard(store, &staged).await;
                Err(err)
            }
        }
    }

    /// Validation and gating that happen before any write.
    async fn prepare(
        &self,
        sender: &Actor,
        request: &ComposeRequest,
        draft_id: Option<i32>,
        has_uploads: bool,
    ) -> Result<Prepared> {
        let subject = validate_subject(&request.subject)?;
        let recipients = RecipientSet::normalize(sender.id, &request.to, &request.cc, &request.bcc);
        let sending = request.action == ComposeAction::Send;
        if sending && recipients.is_empty() {
            return Err(Error::NoRecipients);
        }

        let me = user::Entity::find_by_id(sender.id)
            .one(&self.conn)
            .await?
            .ok_or(Error::NotFound)?;
        let clock = self.clock.as_ref();

        if sending && !may_send_on(&self.conn, clock, sender.role, me.course_id).await? {
            return Err(Error::SendWindowClosed);
        }

        if let Some(id) = draft_id {
            own_draft(&self.conn, sender, id).await?;
        }
        let carries_attachments = match draft_id {
            Some(id) if sending => {
                attachment::Entity::find()
                    .filter(attachment::Column::MessageId.eq(id))
                    .count(&self.conn)
                    .await?
                    > 0
            }
            _ => false,
        };
        if (has_uploads || carries_attachments)
            && !attachments_allowed_on(&self.conn, clock, sender.role, me.course_id).await?
        {
            return Err(Error::AttachmentsDisabled);
        }

        Ok(Prepared {
            subject,
            recipients,
        })
    }

    async fn commit(
        &self,
        sender: &Actor,
        request: &ComposeRequest,
        draft_id: Option<i32>,
        prepared: Prepared,
        staged: &[StagedAttachment],
    ) -> Result<ComposeOutcome> {
        let body_html = self.sanitizer.sanitize(&request.body_html);
        let body_text = html_to_text(&body_html);
        let is_draft = request.action == ComposeAction::Draft;
        let now = self.clock.now_db();
        let Prepared {
            subject,
            recipients,
        } = prepared;

        let txn = self.conn.begin().await?;

        let message = match draft_id {
            Some(id) => {
                let draft = own_draft(&txn, sender, id).await?;

                recipient::Entity::delete_many()
                    .filter(recipient::Column::MessageId.eq(id))
                    .exec(&txn)
                    .await?;
                delivery::Entity::delete_many()
                    .filter(delivery::Column::MessageId.eq(id))
                    .exec(&txn)
                    .await?;

                let mut active: message::ActiveModel = draft.into();
                active.subject = Set(subject);
                active.body_html = Set(body_html);
                active.body_text = Set(body_text);
                active.is_draft = Set(is_draft);
                if !is_draft {
                    active.created_at = Set(now);
                }
                active.update(&txn).await?
            }
            None => {
                let (thread_id, parent_message_id) = resolve_thread(&txn, sender, request, now).await?;
                message::ActiveModel {
                    sender_id: Set(sender.id),
                    subject: Set(subject),
                    body_html: Set(body_html),
                    body_text: Set(body_text),
                    thread_id: Set(thread_id),
                    parent_message_id: Set(parent_message_id),
                    is_draft: Set(is_draft),
                    created_at: Set(now),
                    ..Default::default()
                }
                .insert(&txn)
                .await?
            }
        };

        write_recipients(&txn, message.id, &recipients).await?;
        write_deliveries(&txn, message.id, sender.id, &recipients, is_draft, now).await?;
        if !is_draft {
            write_mail_log(&txn, message.id, sender.id, &recipients, now).await?;
        }
        attachments::insert_rows(&txn, message.id, staged, now).await?;

        txn.commit().await?;

        if is_draft {
            debug!(message_id = message.id, sender_id = sender.id, "draft saved");
        } else {
            info!(
                message_id = message.id,
                thread_id = message.thread_id,
                sender_id = sender.id,
                recipients = recipients.len(),
                attachments = staged.len(),
                "message sent"
            );
        }

        Ok(ComposeOutcome {
            message_id: message.id,
            thread_id: message.thread_id,
            is_draft,
        })
    }
}

struct Prepared {
    subject: String,
    recipients: RecipientSet,
}

/// A draft owned by `sender` that has not been sent yet.
async fn own_draft<C: ConnectionTrait>(conn: &C, sender: &Actor, id: i32) -> Result<message::Model> {
    message::Entity::find_by_id(id)
        .filter(message::Column::SenderId.eq(sender.id))
        .filter(message::Column::IsDraft.eq(true))
        .one(conn)
        .await?
        .ok_or(Error::NotFound)
}

/// Picks the thread of a new message: the one supplied, else the parent's,
/// else a fresh thread.
///
/// The parent must be viewable by the sender. A supplied thread must be the
/// parent's or contain a message the sender can view. Anything else is
/// [`Error::NotFound`], so ids of foreign mail cannot be told from unused ones.
async fn resolve_thread<C: ConnectionTrait>(
    conn: &C,
    sender: &Actor,
    request: &ComposeRequest,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<(i32, Option<i32>)> {
    let parent = match request.parent_message_id {
        Some(id) => Some(viewable_message(conn, sender, id).await?),
        None => None,
    };

    if let Some(thread_id) = request.thread_id {
        let via_parent = parent.as_ref().is_some_and(|p| p.thread_id == thread_id);
        if !via_parent && !thread_is_viewable(conn, sender, thread_id).await? {
            return Err(Error::NotFound);
        }
        return Ok((thread_id, parent.map(|p| p.id)));
    }
    if let Some(parent) = parent {
        return Ok((parent.thread_id, Some(parent.id)));
    }

    let thread = thread::ActiveModel {
        created_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await?;
    Ok((thread.id, None))
}

async fn viewable_message<C: ConnectionTrait>(
    conn: &C,
    viewer: &Actor,
    id: i32,
) -> Result<message::Model> {
    let message = message::Entity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or(Error::NotFound)?;
    match resolve_access(conn, viewer, &message).await? {
        Some(_) => Ok(message),
        None => Err(Error::NotFound),
    }
}

async fn thread_is_viewable<C: ConnectionTrait>(
    conn: &C,
    viewer: &Actor,
    thread_id: i32,
) -> Result<bool> {
    let messages = message::Entity::find()
        .filter(message::Column::ThreadId.eq(thread_id))
        .all(conn)
        .await?;
    for message in &messages {
        if resolve_access(conn, viewer, message).await?.is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn write_recipients<C: ConnectionTrait>(
    conn: &C,
    message_id: i32,
    recipients: &RecipientSet,
) -> Result<()> {
    if recipients.is_empty() {
        return Ok(());
    }
    let rows = recipients.tagged().map(|(user_id, kind)| recipient::ActiveModel {
        message_id: Set(message_id),
        user_id: Set(user_id),
        kind: Set(kind),
        ..Default::default()
    });
    recipient::Entity::insert_many(rows)
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

async fn write_deliveries<C: ConnectionTrait>(
    conn: &C,
    message_id: i32,
    sender_id: i32,
    recipients: &RecipientSet,
    is_draft: bool,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    let row = |owner_user_id: i32, folder: Folder, is_read: bool| delivery::ActiveModel {
        message_id: Set(message_id),
        owner_user_id: Set(owner_user_id),
        folder: Set(folder),
        is_read: Set(is_read),
        created_at: Set(now),
        deleted_at: Set(None),
        ..Default::default()
    };

    let rows: Vec<delivery::ActiveModel> = if is_draft {
        vec![row(sender_id, Folder::Drafts, true)]
    } else {
        std::iter::once(row(sender_id, Folder::Sent, true))
            .chain(recipients.tagged().map(|(id, _)| row(id, Folder::Inbox, false)))
            .collect()
    };
    delivery::Entity::insert_many(rows)
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

async fn write_mail_log<C: ConnectionTrait>(
    conn: &C,
    message_id: i32,
    sender_id: i32,
    recipients: &RecipientSet,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    let log = mail_log::ActiveModel {
        message_id: Set(message_id),
        sender_id: Set(sender_id),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    if recipients.is_empty() {
        return Ok(());
    }
    let rows = recipients.tagged().map(|(user_id, kind)| mail_log_recipient::ActiveModel {
        log_id: Set(log.id),
        user_id: Set(user_id),
        kind: Set(kind),
        ..Default::default()
    });
    mail_log_recipient::Entity::insert_many(rows)
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_occurrence_wins_and_sender_is_dropped() {
        let set = RecipientSet::normalize(1, &[2, 3], &[3, 4], &[1, 2]);
        assert_eq!(set.to, vec![2, 3]);
        assert_eq!(set.cc, vec![4]);
        assert!(set.bcc.is_empty());
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn duplicates_within_one_field_collapse() {
        let set = RecipientSet::normalize(9, &[5, 5, 9], &[], &[6, 6, 5]);
        assert_eq!(set.to, vec![5]);
        assert_eq!(set.bcc, vec![6]);
    }

    #[test]
    fn only_the_sender_means_no_recipients() {
        assert!(RecipientSet::normalize(7, &[7], &[7], &[7]).is_empty());
    }

    #[test]
    fn tagged_keeps_field_order() {
        let set = RecipientSet::normalize(1, &[2], &[3], &[4]);
        let tagged: Vec<_> = set.tagged().collect();
        assert_eq!(
            tagged,
            vec![
                (2, RecipientKind::To),
                (3, RecipientKind::Cc),
                (4, RecipientKind::Bcc)
            ]
        );
    }

    #[test]
    fn subject_bounds_count_characters_after_trim() {
        assert_eq!(validate_subject("  Hausaufgaben  ").unwrap(), "Hausaufgaben");
        assert!(matches!(validate_subject("   "), Err(Error::InvalidSubject)));
        assert!(validate_subject(&"ä".repeat(200)).is_ok());
        assert!(matches!(
            validate_subject(&"a".repeat(201)),
            Err(Error::InvalidSubject)
        ));
    }

    #[test]
    fn request_defaults_to_send() {
        assert_eq!(ComposeRequest::default().action, ComposeAction::Send);
    }
}
