//! Process-wide set of in-flight downloads

use log::info;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::session::{lock_session, SharedSession};
use super::types::{AbortReason, DownloadId};

/// Sessions between their start and their cleanup, in start order.
///
/// Cloning shares the same set. Bulk operations work on a snapshot, so
/// sessions may unregister themselves while one is running.
#[derive(Clone, Default)]
pub struct ActiveDownloads {
    sessions: Arc<Mutex<Vec<(DownloadId, SharedSession)>>>,
}

impl ActiveDownloads {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<(DownloadId, SharedSession)>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, id: DownloadId, session: SharedSession) {
        self.entries().push((id, session));
    }

    /// Returns false when the session was not registered
    pub fn remove(&self, id: DownloadId) -> bool {
        let mut entries = self.entries();
        match entries.iter().position(|(entry_id, _)| *entry_id == id) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: DownloadId) -> bool {
        self.entries().iter().any(|(entry_id, _)| *entry_id == id)
    }

    pub fn count(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn ids(&self) -> Vec<DownloadId> {
        self.entries().iter().map(|(id, _)| *id).collect()
    }

    pub fn snapshot(&self) -> Vec<SharedSession> {
        self.entries()
            .iter()
            .map(|(_, session)| session.clone())
            .collect()
    }

    /// Abort every registered transfer, drop its journal object and clean it up.
    /// Returns the number of sessions aborted.
    pub fn cancel_all(&self) -> usize {
        let sessions = self.snapshot();
        info!("downloads_cancel_all: count={}", sessions.len());

        sessions
            .iter()
            .filter(|session| lock_session(session).abort(AbortReason::Shutdown))
            .count()
    }
}

impl std::fmt::Debug for ActiveDownloads {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveDownloads")
            .field("ids", &self.ids())
            .finish()
    }
}
