//! Error type shared by every component of the mail engine.

use sea_orm::{DbErr, SqlErr};

/// Errors surfaced by the mail engine.
///
/// Authorization failures and missing rows are deliberately collapsed into
/// [`Error::NotFound`] so callers cannot probe for messages, users or tenants
/// outside their scope.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The subject is empty or longer than 200 characters after trimming.
    #[error("subject must be between 1 and 200 characters")]
    InvalidSubject,

    /// A `send` action ended up with no recipients after normalization.
    #[error("at least one recipient (To/CC/BCC) is required")]
    NoRecipients,

    /// Any other malformed input.
    #[error("invalid input: {0}")]
    Validation(String),

    /// A student tried to send while the course send window is closed.
    #[error("sending is locked for this course")]
    SendWindowClosed,

    /// A student tried to use attachments while they are not enabled.
    #[error("attachments are not enabled for this course")]
    AttachmentsDisabled,

    #[error("attachment exceeds the size limit of {max_bytes} bytes")]
    AttachmentTooLarge { max_bytes: u64 },

    #[error("at most {max_files} attachments are allowed")]
    TooManyAttachments { max_files: usize },

    /// The attachment bytes did not match any accepted file type.
    #[error("attachment type is not allowed")]
    UnsupportedAttachmentType,

    /// The target does not exist or the caller may not see it.
    #[error("not found")]
    NotFound,

    /// A uniqueness constraint rejected the write.
    #[error("{entity} already exists")]
    Conflict { entity: &'static str },

    /// The external attachment store failed.
    #[error("attachment storage failed: {0}")]
    Storage(#[source] std::io::Error),

    /// A table the engine depends on does not exist.
    #[error("required table `{0}` is missing")]
    SchemaMissing(&'static str),

    #[error(transparent)]
    Database(#[from] DbErr),
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Maps unique-constraint violations to [`Error::Conflict`], passing every
    /// other database error through.
    pub(crate) fn from_insert(err: DbErr, entity: &'static str) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => Error::Conflict { entity },
            _ => Error::Database(err),
        }
    }

    /// True for the errors that leave no trace in the database because they
    /// are raised before any transaction is opened.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidSubject
                | Error::NoRecipients
                | Error::Validation(_)
                | Error::AttachmentTooLarge { .. }
                | Error::TooManyAttachments { .. }
                | Error::UnsupportedAttachmentType
        )
    }
}
