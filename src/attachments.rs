//! Attachment intake: type sniffing, name sanitizing and staging of bytes in
//! the external store.
//!
//! Bytes never enter the database. They are written to an [`AttachmentStore`]
//! before the compose transaction opens, and removed again (best effort) when
//! the transaction does not commit.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::AttachmentLimits;
use crate::entity::attachment;
use crate::error::{Error, Result};

const FALLBACK_NAME: &str = "attachment";
const HEIF_BRANDS: [&[u8; 4]; 7] = [b"heic", b"heif", b"heix", b"hevc", b"hevx", b"mif1", b"msf1"];

/// External byte store for attachment files.
///
/// `put` returns an opaque, collision-free storage name; the engine stores it
/// and later hands it back to `remove`.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn put(&self, bytes: &[u8], extension: &str) -> io::Result<String>;

    async fn remove(&self, storage_name: &str) -> io::Result<()>;
}

/// A file as received from the client.
#[derive(Debug, Clone, Deserialize)]
pub struct Upload {
    pub original_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(original_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            original_name: original_name.into(),
            bytes: bytes.into(),
        }
    }
}

/// A file type recognised from its leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SniffedType {
    pub mime: &'static str,
    pub extension: &'static str,
}

impl SniffedType {
    const fn new(mime: &'static str, extension: &'static str) -> Self {
        Self { mime, extension }
    }
}

/// Identifies PDF, PNG, JPEG, GIF, WebP and HEIC/HEIF files by magic bytes.
/// Anything else is rejected, whatever the client claimed.
pub fn sniff(bytes: &[u8]) -> Option<SniffedType> {
    if bytes.len() < 4 {
        return None;
    }
    if bytes.starts_with(b"%PDF-") {
        return Some(SniffedType::new("application/pdf", ".pdf"));
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]) {
        return Some(SniffedType::new("image/png", ".png"));
    }
    if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
        return Some(SniffedType::new("image/jpeg", ".jpg"));
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some(SniffedType::new("image/gif", ".gif"));
    }
    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        return Some(SniffedType::new("image/webp", ".webp"));
    }
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" && HEIF_BRANDS.iter().any(|b| &bytes[8..12] == *b) {
        return Some(SniffedType::new("image/heic", ".heic"));
    }
    None
}

/// Reduces a client-supplied file name to a single-line base name.
pub fn sanitize_original_name(name: &str) -> String {
    let base = Path::new(name.trim_end_matches('/'))
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if matches!(c, '\r' | '\n' | '\0') { ' ' } else { c })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Checks count, size and type of every upload before anything is written.
pub fn inspect(uploads: &[Upload], limits: &AttachmentLimits) -> Result<Vec<SniffedType>> {
    if uploads.len() > limits.max_files {
        return Err(Error::TooManyAttachments {
            max_files: limits.max_files,
        });
    }
    uploads
        .iter()
        .map(|upload| {
            if upload.bytes.len() as u64 > limits.max_bytes {
                return Err(Error::AttachmentTooLarge {
                    max_bytes: limits.max_bytes,
                });
            }
            sniff(&upload.bytes).ok_or(Error::UnsupportedAttachmentType)
        })
        .collect()
}

/// Bytes already handed to the store, waiting for their metadata row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedAttachment {
    pub original_name: String,
    pub storage_name: String,
    pub mime_type: &'static str,
    pub size_bytes: i64,
}

/// Writes every upload to `store`. If one write fails, the files written so
/// far are removed again and the store error is returned.
pub async fn stage(
    store: &dyn AttachmentStore,
    uploads: &[Upload],
    limits: &AttachmentLimits,
) -> Result<Vec<StagedAttachment>> {
    let types = inspect(uploads, limits)?;
    let mut staged = Vec::with_capacity(uploads.len());

    for (upload, kind) in uploads.iter().zip(types) {
        match store.put(&upload.bytes, kind.extension).await {
            Ok(storage_name) => staged.push(StagedAttachment {
                original_name: sanitize_original_name(&upload.original_name),
                storage_name,
                mime_type: kind.mime,
                size_bytes: upload.bytes.len() as i64,
            }),
            Err(err) => {
                discard(store, &staged).await;
                return Err(Error::Storage(err));
            }
        }
    }

    debug!(files = staged.len(), "attachments staged");
    Ok(staged)
}

/// Best-effort removal of staged bytes after a failed compose.
pub async fn discard(store: &dyn AttachmentStore, staged: &[StagedAttachment]) {
    for file in staged {
        if let Err(err) = store.remove(&file.storage_name).await {
            warn!(storage_name = %file.storage_name, error = %err, "failed to remove staged attachment");
        }
    }
}

/// Best-effort removal of stored files by name.
pub async fn purge(store: &dyn AttachmentStore, storage_names: &[String]) -> usize {
    let mut removed = 0;
    for name in storage_names {
        match store.remove(name).await {
            Ok(()) => removed += 1,
            Err(err) => warn!(storage_name = %name, error = %err, "failed to remove attachment file"),
        }
    }
    removed
}

pub(crate) async fn insert_rows<C: ConnectionTrait>(
    conn: &C,
    message_id: i32,
    staged: &[StagedAttachment],
    now: DateTime<Utc>,
) -> Result<()> {
    if staged.is_empty() {
        return Ok(());
    }
    let rows = staged.iter().map(|file| attachment::ActiveModel {
        message_id: Set(message_id),
        original_name: Set(file.original_name.clone()),
        storage_name: Set(file.storage_name.clone()),
        mime_type: Set(file.mime_type.to_string()),
        size_bytes: Set(file.size_bytes),
        created_at: Set(now),
        ..Default::default()
    });
    attachment::Entity::insert_many(rows)
        .exec_without_returning(conn)
        .await
        .map_err(|e| Error::from_insert(e, "attachment"))?;
    Ok(())
}

/// Attachments of a message in upload order.
pub async fn list_for_message<C: ConnectionTrait>(
    conn: &C,
    message_id: i32,
) -> Result<Vec<attachment::Model>> {
    Ok(attachment::Entity::find()
        .filter(attachment::Column::MessageId.eq(message_id))
        .order_by_asc(attachment::Column::Id)
        .all(conn)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_accepted_types() {
        let cases: [(&[u8], &str); 7] = [
            (b"%PDF-1.7 ...", "application/pdf"),
            (&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0], "image/png"),
            (&[0xff, 0xd8, 0xff, 0xe0], "image/jpeg"),
            (b"GIF89a....", "image/gif"),
            (b"RIFF\x10\0\0\0WEBPVP8 ", "image/webp"),
            (b"\0\0\0\x18ftypheic\0\0", "image/heic"),
            (b"\0\0\0\x18ftypmif1\0\0", "image/heic"),
        ];
        for (bytes, mime) in cases {
            assert_eq!(sniff(bytes).map(|t| t.mime), Some(mime));
        }
    }

    #[test]
    fn rejects_unknown_and_short_input() {
        assert_eq!(sniff(b"MZ\x90\0 executable"), None);
        assert_eq!(sniff(b"\0\0\0\x18ftypisom"), None);
        assert_eq!(sniff(b"%PD"), None);
        assert_eq!(sniff(b""), None);
    }

    #[test]
    fn original_names_are_reduced_to_a_base_name() {
        assert_eq!(sanitize_original_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_original_name("reports/q1\r\n.pdf"), "q1  .pdf");
        assert_eq!(sanitize_original_name("  \0 "), "attachment");
        assert_eq!(sanitize_original_name(""), "attachment");
        assert_eq!(sanitize_original_name("folder/"), "folder");
    }

    #[test]
    fn inspect_enforces_limits_before_types() {
        let limits = AttachmentLimits {
            max_bytes: 8,
            max_files: 1,
        };
        let pdf = Upload::new("a.pdf", b"%PDF-1".to_vec());
        assert!(matches!(
            inspect(&[pdf.clone(), pdf.clone()], &limits),
            Err(Error::TooManyAttachments { max_files: 1 })
        ));
        assert!(matches!(
            inspect(&[Upload::new("big.pdf", b"%PDF-123456789".to_vec())], &limits),
            Err(Error::AttachmentTooLarge { max_bytes: 8 })
        ));
        assert!(matches!(
            inspect(&[Upload::new("x.exe", b"MZ\x90\0".to_vec())], &limits),
            Err(Error::UnsupportedAttachmentType)
        ));
        assert_eq!(inspect(&[pdf], &limits).unwrap()[0].extension, ".pdf");
    }
}
