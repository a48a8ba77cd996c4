//! Engine configuration and role capabilities.
//!
//! Deployments toggle behaviour through process environment flags
//! ([`MailConfig::from_env`]). Inside the crate the result is a plain value
//! handed to each component, so nothing reads the environment on its own.

use serde::{Deserialize, Serialize};

use crate::entity::user::Role;

const DEFAULT_SEND_WINDOW_MINUTES: u32 = 45;
const DEFAULT_ATTACHMENT_MAX_MB: u64 = 10;
const DEFAULT_ATTACHMENT_MAX_FILES: usize = 10;

/// Send-window durations are clamped to this range, in minutes.
pub const SEND_WINDOW_MINUTES_RANGE: (u32, u32) = (1, 240);

/// Role-level switches that the authorizer and engine consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// Teachers see BCC recipients of messages they may view.
    pub teacher_can_see_bcc: bool,
    /// School administrators see BCC recipients of messages they may view.
    pub schooladmin_can_see_bcc: bool,
    /// Teachers may create student accounts in their own courses.
    pub teacher_can_create_accounts: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            teacher_can_see_bcc: false,
            schooladmin_can_see_bcc: true,
            teacher_can_create_accounts: false,
        }
    }
}

impl Capabilities {
    /// Whether a viewer of this role may see BCC entries on messages they did
    /// not send.
    pub fn can_see_bcc(&self, role: Role) -> bool {
        match role {
            Role::Admin => true,
            Role::SchoolAdmin => self.schooladmin_can_see_bcc,
            Role::Teacher => self.teacher_can_see_bcc,
            Role::Student => false,
        }
    }

    pub fn can_create_accounts(&self, role: Role) -> bool {
        match role {
            Role::Admin | Role::SchoolAdmin => true,
            Role::Teacher => self.teacher_can_create_accounts,
            Role::Student => false,
        }
    }
}

/// Upload limits for message attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentLimits {
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Default for AttachmentLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_ATTACHMENT_MAX_MB * 1024 * 1024,
            max_files: DEFAULT_ATTACHMENT_MAX_FILES,
        }
    }
}

/// Everything configurable about the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub capabilities: Capabilities,
    /// Duration used when a send window is opened without an explicit length.
    pub default_send_window_minutes: u32,
    pub attachments: AttachmentLimits,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            capabilities: Capabilities::default(),
            default_send_window_minutes: DEFAULT_SEND_WINDOW_MINUTES,
            attachments: AttachmentLimits::default(),
        }
    }
}

impl MailConfig {
    /// Reads the configuration from the process environment.
    ///
    /// | Variable                  | Meaning                              |
    /// |---------------------------|--------------------------------------|
    /// | `TEACHER_CAN_SEE_BCC`     | `1` lets teachers see BCC            |
    /// | `SCHOOLADMIN_CAN_SEE_BCC` | `0` hides BCC from school admins     |
    /// | `TEACHER_CAN_CREATE`      | `1` lets teachers create students    |
    /// | `SEND_WINDOW_MINUTES`     | default send-window length           |
    /// | `ATTACHMENTS_MAX_MB`      | per-file size limit, at least 1      |
    /// | `ATTACHMENTS_MAX_FILES`   | files per message, at least 1        |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Unset or
    /// unparsable values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| match lookup(key).as_deref().map(str::trim) {
            Some("1") | Some("true") => true,
            Some("0") | Some("false") => false,
            _ => default,
        };
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let capabilities = Capabilities {
            teacher_can_see_bcc: flag(
                "TEACHER_CAN_SEE_BCC",
                defaults.capabilities.teacher_can_see_bcc,
            ),
            schooladmin_can_see_bcc: flag(
                "SCHOOLADMIN_CAN_SEE_BCC",
                defaults.capabilities.schooladmin_can_see_bcc,
            ),
            teacher_can_create_accounts: flag(
                "TEACHER_CAN_CREATE",
                defaults.capabilities.teacher_can_create_accounts,
            ),
        };

        let default_send_window_minutes = number("SEND_WINDOW_MINUTES")
            .map(|m| clamp_send_window_minutes(m.min(u32::MAX as u64) as u32))
            .unwrap_or(defaults.default_send_window_minutes);

        let attachments = AttachmentLimits {
            max_bytes: number("ATTACHMENTS_MAX_MB")
                .map(|mb| mb.max(1) * 1024 * 1024)
                .unwrap_or(defaults.attachments.max_bytes),
            max_files: number("ATTACHMENTS_MAX_FILES")
                .map(|n| n.max(1) as usize)
                .unwrap_or(defaults.attachments.max_files),
        };

        Self {
            capabilities,
            default_send_window_minutes,
            attachments,
        }
    }
}

/// Clamps a requested send-window length to [`SEND_WINDOW_MINUTES_RANGE`].
pub fn clamp_send_window_minutes(minutes: u32) -> u32 {
    let (min, max) = SEND_WINDOW_MINUTES_RANGE;
    minutes.clamp(min, max)
}
