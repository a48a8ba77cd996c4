//! Read side of the content-free audit trail.
//!
//! Entries name the sender and the TO/CC/BCC recipients of every sent
//! message. Subjects and bodies are never part of an entry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect,
};
use serde::Serialize;

use crate::actor::Participant;
use crate::directory::school_course_ids;
use crate::entity::{mail_log, mail_log_recipient, user, RecipientKind};
use crate::error::Result;

/// Which part of the log a caller may read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogScope {
    /// Everything; for the global admin.
    All,
    /// Mail sent by members of the school's courses.
    School(i32),
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub log_id: i32,
    pub message_id: i32,
    pub created_at: DateTime<Utc>,
    pub sender: Participant,
    pub to: Vec<Participant>,
    pub cc: Vec<Participant>,
    pub bcc: Vec<Participant>,
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    conn: DatabaseConnection,
}

impl AuditLog {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// A page of the log, newest first.
    pub async fn fetch(&self, scope: LogScope, limit: u64, offset: u64) -> Result<Vec<AuditEntry>> {
        let logs = mail_log::Entity::find()
            .find_also_related(user::Entity)
            .filter(self.scope_condition(scope).await?)
            .order_by_desc(mail_log::Column::CreatedAt)
            .order_by_desc(mail_log::Column::Id)
            .limit(limit)
            .offset(offset)
            .all(&self.conn)
            .await?;
        if logs.is_empty() {
            return Ok(Vec::new());
        }

        let log_ids: Vec<i32> = logs.iter().map(|(l, _)| l.id).collect();
        let rows = mail_log_recipient::Entity::find()
            .find_also_related(user::Entity)
            .filter(mail_log_recipient::Column::LogId.is_in(log_ids))
            .order_by_asc(user::Column::DisplayName)
            .order_by_asc(mail_log_recipient::Column::Id)
            .all(&self.conn)
            .await?;

        let mut grouped: HashMap<i32, [Vec<Participant>; 3]> = HashMap::new();
        for (row, u) in rows {
            let Some(u) = u else { continue };
            let slot = match row.kind {
                RecipientKind::To => 0,
                RecipientKind::Cc => 1,
                RecipientKind::Bcc => 2,
            };
            grouped.entry(row.log_id).or_default()[slot].push(u.into());
        }

        Ok(logs
            .into_iter()
            .filter_map(|(log, sender)| {
                let [to, cc, bcc] = grouped.remove(&log.id).unwrap_or_default();
                Some(AuditEntry {
                    log_id: log.id,
                    message_id: log.message_id,
                    created_at: log.created_at,
                    sender: sender?.into(),
                    to,
                    cc,
                    bcc,
                })
            })
            .collect())
    }

    pub async fn count(&self, scope: LogScope) -> Result<u64> {
        Ok(mail_log::Entity::find()
            .filter(self.scope_condition(scope).await?)
            .count(&self.conn)
            .await?)
    }

    async fn scope_condition(&self, scope: LogScope) -> Result<Condition> {
        Ok(match scope {
            LogScope::All => Condition::all(),
            LogScope::School(school_id) => {
                let courses = school_course_ids(&self.conn, school_id).await?;
                let senders: Vec<i32> = user::Entity::find()
                    .select_only()
                    .column(user::Column::Id)
                    .filter(user::Column::CourseId.is_in(courses))
                    .into_tuple()
                    .all(&self.conn)
                    .await?;
                Condition::all().add(mail_log::Column::SenderId.is_in(senders))
            }
        })
    }
}
