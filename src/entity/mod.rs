//! Database entity models for the school mail engine.
//!
//! One Sea-ORM entity per table. Tenancy flows top-down
//! (`school` → `course` → `user`), mail flows through `message` into the
//! authored address list (`recipient`), the per-owner mailbox placement
//! (`delivery`) and the content-free audit trail (`mail_log`,
//! `mail_log_recipient`).

pub mod attachment;
pub mod course;
pub mod course_send_window;
pub mod delivery;
pub mod mail_log;
pub mod mail_log_recipient;
pub mod message;
pub mod recipient;
pub mod school;
pub mod teacher_course;
pub mod thread;
pub mod user;

pub use delivery::Folder;
pub use recipient::RecipientKind;
pub use user::Role;
