//! # School Mail Core
//!
//! The delivery and visibility engine behind a closed, internal mail system for
//! schools, built on [Sea-ORM](https://crates.io/crates/sea-orm).
//!
//! Users belong to schools and courses and hold one of four roles (admin,
//! school administrator, teacher, student). The engine decides who may see
//! and address whom, stores messages with per-owner mailbox placement, keeps a
//! content-free audit log, gates student sending behind per-course send
//! windows and removes everything a deleted course, school or expired account
//! leaves behind.
//!
//! HTTP handling, sessions, password hashing and page rendering belong to the
//! host application. Every operation here takes an [`Actor`] that the host has
//! already authenticated.
//!
//! ## Features
//!
//! - Role- and tenant-scoped user directory with search
//! - Compose, draft and send with TO/CC/BCC de-duplication
//! - INBOX, SENT, DRAFTS and TRASH per owner, with read state
//! - BCC redaction by viewer role
//! - Read-only supervisory access for teachers and school administrators
//! - Per-course send windows with an attachment switch
//! - Attachment validation by content sniffing, behind a pluggable store
//! - Transactional cascade cleanup
//!
//! ## Quick Start
//!
//! ```no_run
//! use sea_orm::Database;
//! use school_mail_core::{Actor, ComposeRequest, Folder, MailConfig, MailService, Role};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = Database::connect("sqlite://mail.db?mode=rwc").await?;
//! let service = MailService::new(conn).with_config(MailConfig::from_env());
//! service.migrate().await?;
//!
//! let teacher = Actor::new(7, Role::Teacher);
//! let visible = service.visibility().visible_users(&teacher).await?;
//! let to: Vec<i32> = visible.iter().take(3).map(|u| u.id).collect();
//!
//! let outcome = service
//!     .engine()
//!     .compose(
//!         &teacher,
//!         ComposeRequest {
//!             to,
//!             subject: "Reading list".into(),
//!             body_html: "<p>Chapters 1 to 3 for Monday.</p>".into(),
//!             ..Default::default()
//!         },
//!     )
//!     .await?;
//!
//! let sent = service.mailbox().list_folder(&teacher, Folder::Sent, 50).await?;
//! assert!(sent.iter().any(|e| e.message_id == outcome.message_id));
//! # Ok(())
//! # }
//! ```
//!
//! ## Student Send Windows
//!
//! ```no_run
//! use school_mail_core::{Actor, MailService, Role};
//!
//! # async fn example(service: MailService) -> school_mail_core::Result<()> {
//! let teacher = Actor::new(7, Role::Teacher);
//! // 45 minutes by default, with attachments allowed
//! let until = service.open_send_window(&teacher, 3, None, true).await?;
//! println!("students of course 3 may send until {until}");
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod actor;
pub mod attachments;
pub mod audit;
pub mod cleanup;
pub mod clock;
pub mod compose;
pub mod config;
pub mod directory;
pub mod entity;
pub mod error;
pub mod mailbox;
#[cfg(feature = "migration")]
pub mod migration;
pub mod sanitize;
pub mod send_window;
mod service;
pub mod visibility;

/// The main entry point; see [`MailService`] for usage details.
pub use service::{MailService, REQUIRED_TABLES};

/// Error and result types returned by every operation.
pub use error::{Error, Result};

/// The authenticated caller and the way other users are shown.
pub use actor::{Actor, Participant};

/// Roles, mailbox folders and recipient kinds.
pub use entity::{Folder, RecipientKind, Role};

/// Engine configuration.
pub use config::{AttachmentLimits, Capabilities, MailConfig};

/// Time sources. Use [`ManualClock`] to drive send-window and expiry tests.
pub use clock::{Clock, ManualClock, SystemClock};

/// Body sanitization hook.
pub use sanitize::{EscapingSanitizer, HtmlSanitizer};

/// Storage backend for attachment bytes, implemented by the host.
pub use attachments::{AttachmentStore, Upload};

pub use access::{AccessPath, MessageAccess, MessageAuthorizer, RecipientLists};
pub use audit::{AuditEntry, AuditLog, LogScope};
pub use cleanup::{CascadeCleanup, CleanupImpact, CleanupReport};
pub use compose::{ComposeAction, ComposeOutcome, ComposeRequest, MailEngine};
pub use directory::{Directory, NewUser};
pub use mailbox::{Mailbox, MailboxEntry, ReplyMode};
pub use send_window::{SendWindowGate, SendWindowState, SendWindowStatus};
pub use visibility::{VisibilityResolver, VisibleUser};
