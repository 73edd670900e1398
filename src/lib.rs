//! Browser download handling backed by the activity journal.
//!
//! The engine binding creates sessions through [`DownloadManager`] and feeds
//! them engine callbacks; sessions persist into a [`JournalStore`] and talk
//! to the user through a [`Notifier`].

pub mod config;
pub mod content;
pub mod download;
pub mod journal;
pub mod notify;

pub use config::DownloadConfig;
pub use content::{ContentInspector, SignatureInspector};
pub use download::{
    ActiveDownloads, DownloadManager, PreparedDestination, SessionHandle, SessionState,
    StateFlag, TransferHandle, TransferInit, TransferListener, TransferStatus,
};
pub use journal::{JournalEntry, JournalError, JournalStore, LocalJournal, ObjectId};
pub use notify::{Alert, AlertAction, AlertId, AlertResponse, Notifier, WindowId};
