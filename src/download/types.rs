//! Download lifecycle types, status codes and alert texts

use serde::{Deserialize, Serialize};

/// Identifier of one download session, unique within a manager
pub type DownloadId = u64;

/// Generic failure (nsError.h)
pub const NS_ERROR_FAILURE: u32 = 0x8000_4005;
/// Transfer aborted by its binding (nsNetError.h)
pub const NS_BINDING_ABORTED: u32 = 0x804b_0002;
/// "Save link as" gave up waiting for headers (nsURILoader.h)
pub const NS_ERROR_SAVE_LINK_AS_TIMEOUT: u32 = 0x805d_0020;

/// Code passed to the transfer handle whenever this crate aborts a transfer
pub const CANCEL_STATUS: u32 = NS_BINDING_ABORTED;

/// MIME types the engine reports when it could not tell what it was fetching
pub const GENERIC_MIME_TYPES: &[&str] = &["application/octet-stream", "application/x-zip"];

pub(crate) const TITLE_DOWNLOAD_STARTED: &str = "Download started";
pub(crate) const TITLE_DOWNLOAD_COMPLETED: &str = "Download completed";
pub(crate) const LABEL_CANCEL: &str = "Cancel";
pub(crate) const LABEL_SHOW_IN_JOURNAL: &str = "Show in Journal";
pub(crate) const LABEL_OK: &str = "Ok";
pub(crate) const DATA_URI_NAME: &str = "Data URI";

/// Lifecycle of a download session.
///
/// `CleanedUp` is terminal; every other end state funnels into it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    #[serde(rename = "init")]
    Init,
    #[serde(rename = "started")]
    Started,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "stopped_ok")]
    StoppedOk,
    #[serde(rename = "stopped_failed")]
    StoppedFailed,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "cleaned_up")]
    CleanedUp,
}

impl SessionState {
    /// Started or receiving progress
    pub fn is_transferring(self) -> bool {
        matches!(self, SessionState::Started | SessionState::InProgress)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Init => write!(f, "init"),
            SessionState::Started => write!(f, "started"),
            SessionState::InProgress => write!(f, "in_progress"),
            SessionState::StoppedOk => write!(f, "stopped_ok"),
            SessionState::StoppedFailed => write!(f, "stopped_failed"),
            SessionState::Cancelled => write!(f, "cancelled"),
            SessionState::CleanedUp => write!(f, "cleaned_up"),
        }
    }
}

/// State flag carried by the engine's state-change callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFlag {
    Start,
    Stop,
}

/// Result status reported by the engine alongside a state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Ok,
    Failed(u32),
}

impl TransferStatus {
    /// Interpret a raw nsresult: the high bit marks failure
    pub fn from_code(code: u32) -> Self {
        if code & 0x8000_0000 != 0 {
            TransferStatus::Failed(code)
        } else {
            TransferStatus::Ok
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, TransferStatus::Failed(_))
    }
}

/// Why a session is being aborted by this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Cancel pressed on the start alert
    User,
    /// The journal object vanished while the transfer was running
    JournalDeleted,
    /// Process shutdown through `remove_all_downloads`
    Shutdown,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::User => write!(f, "user"),
            AbortReason::JournalDeleted => write!(f, "journal_deleted"),
            AbortReason::Shutdown => write!(f, "shutdown"),
        }
    }
}
