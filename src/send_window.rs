//! Per-course send window for students.
//!
//! The stored state is a nullable `open_until`: null is closed, a timestamp
//! is open until it lapses. Nothing closes a window proactively; every read
//! compares against the clock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ConnectionTrait, DatabaseConnection, EntityTrait, Set};
use serde::Serialize;
use time::Duration;
use tracing::info;

use crate::actor::Actor;
use crate::clock::{to_db_timestamp, Clock};
use crate::config::clamp_send_window_minutes;
use crate::directory::can_manage_course;
use crate::entity::{course_send_window, user::Role};
use crate::error::{Error, Result};

/// Whether students of a course may currently send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "until", rename_all = "snake_case")]
pub enum SendWindowState {
    Closed,
    OpenUntil(DateTime<Utc>),
}

impl SendWindowState {
    fn from_row(open_until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        match open_until {
            Some(until) if now <= until => SendWindowState::OpenUntil(until),
            _ => SendWindowState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, SendWindowState::OpenUntil(_))
    }
}

/// What a teacher dashboard shows about a course's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SendWindowStatus {
    pub state: SendWindowState,
    /// The stored flag; it only takes effect while the window is open.
    pub attachments_enabled: bool,
}

/// Opens, closes and evaluates send windows.
#[derive(Debug, Clone)]
pub struct SendWindowGate {
    conn: DatabaseConnection,
    clock: Arc<dyn Clock>,
}

impl SendWindowGate {
    pub fn new(conn: DatabaseConnection, clock: Arc<dyn Clock>) -> Self {
        Self { conn, clock }
    }

    pub async fn status(&self, course_id: i32) -> Result<SendWindowStatus> {
        status_on(&self.conn, self.clock.as_ref(), course_id).await
    }

    pub async fn is_open(&self, course_id: i32) -> Result<bool> {
        Ok(self.status(course_id).await?.state.is_open())
    }

    /// Non-students may always attach files. Students need an open window with
    /// attachments enabled, in their own course.
    pub async fn attachments_allowed(&self, role: Role, course_id: Option<i32>) -> Result<bool> {
        attachments_allowed_on(&self.conn, self.clock.as_ref(), role, course_id).await
    }

    /// Opens the window for `minutes` (clamped to 1..=240) from now and returns
    /// the closing instant. Reopening replaces the previous deadline.
    pub async fn open(
        &self,
        course_id: i32,
        minutes: u32,
        attachments_enabled: bool,
    ) -> Result<DateTime<Utc>> {
        let minutes = clamp_send_window_minutes(minutes);
        let until = to_db_timestamp(self.clock.now() + Duration::minutes(i64::from(minutes)));

        upsert(&self.conn, course_id, Some(until), attachments_enabled, self.clock.now_db()).await?;

        info!(course_id, minutes, attachments_enabled, "send window opened");
        Ok(until)
    }

    pub async fn close(&self, course_id: i32) -> Result<()> {
        upsert(&self.conn, course_id, None, false, self.clock.now_db()).await?;
        info!(course_id, "send window closed");
        Ok(())
    }

    /// [`open`](Self::open) on behalf of `actor`, who must manage the course.
    pub async fn open_as(
        &self,
        actor: &Actor,
        course_id: i32,
        minutes: u32,
        attachments_enabled: bool,
    ) -> Result<DateTime<Utc>> {
        if !can_manage_course(&self.conn, actor, course_id).await? {
            return Err(Error::NotFound);
        }
        self.open(course_id, minutes, attachments_enabled).await
    }

    pub async fn close_as(&self, actor: &Actor, course_id: i32) -> Result<()> {
        if !can_manage_course(&self.conn, actor, course_id).await? {
            return Err(Error::NotFound);
        }
        self.close(course_id).await
    }
}

async fn upsert<C: ConnectionTrait>(
    conn: &C,
    course_id: i32,
    open_until: Option<DateTime<Utc>>,
    attachments_enabled: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    course_send_window::Entity::insert(course_send_window::ActiveModel {
        course_id: Set(course_id),
        open_until: Set(open_until),
        attachments_enabled: Set(attachments_enabled),
        updated_at: Set(now),
    })
    .on_conflict(
        OnConflict::column(course_send_window::Column::CourseId)
            .update_columns([
                course_send_window::Column::OpenUntil,
                course_send_window::Column::AttachmentsEnabled,
                course_send_window::Column::UpdatedAt,
            ])
            .to_owned(),
    )
    .exec_without_returning(conn)
    .await
    .map_err(|e| match e.sql_err() {
        Some(sea_orm::SqlErr::ForeignKeyConstraintViolation(_)) => Error::NotFound,
        _ => Error::Database(e),
    })?;
    Ok(())
}

pub(crate) async fn status_on<C: ConnectionTrait>(
    conn: &C,
    clock: &dyn Clock,
    course_id: i32,
) -> Result<SendWindowStatus> {
    let row = course_send_window::Entity::find_by_id(course_id).one(conn).await?;
    let now = clock.now_db();
    Ok(match row {
        Some(row) => SendWindowStatus {
            state: SendWindowState::from_row(row.open_until, now),
            attachments_enabled: row.attachments_enabled,
        },
        None => SendWindowStatus {
            state: SendWindowState::Closed,
            attachments_enabled: false,
        },
    })
}

/// Whether a sender of `role` may send right now. Non-students bypass the gate.
pub(crate) async fn may_send_on<C: ConnectionTrait>(
    conn: &C,
    clock: &dyn Clock,
    role: Role,
    course_id: Option<i32>,
) -> Result<bool> {
    match (role, course_id) {
        (Role::Student, Some(course_id)) => {
            Ok(status_on(conn, clock, course_id).await?.state.is_open())
        }
        (Role::Student, None) => Ok(false),
        (Role::Teacher | Role::SchoolAdmin | Role::Admin, _) => Ok(true),
    }
}

pub(crate) async fn attachments_allowed_on<C: ConnectionTrait>(
    conn: &C,
    clock: &dyn Clock,
    role: Role,
    course_id: Option<i32>,
) -> Result<bool> {
    match (role, course_id) {
        (Role::Student, Some(course_id)) => {
            let status = status_on(conn, clock, course_id).await?;
            Ok(status.state.is_open() && status.attachments_enabled)
        }
        (Role::Student, None) => Ok(false),
        (Role::Teacher | Role::SchoolAdmin | Role::Admin, _) => Ok(true),
    }
}
