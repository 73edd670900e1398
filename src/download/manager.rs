//! Process-wide control surface for downloads

use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::registry::ActiveDownloads;
use super::session::{DownloadSession, SessionContext, SessionHandle, TransferInit};
use super::sweeper::StaleTempFileSweeper;
use super::types::DownloadId;
use crate::config::DownloadConfig;
use crate::content::{ContentInspector, SignatureInspector};
use crate::journal::JournalStore;
use crate::notify::{Notifier, WindowId};

/// A staged destination file plus the window that asked for it.
///
/// Returned by `prepare_destination` and passed back in `TransferInit`, so
/// the session knows where to post its alerts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedDestination {
    pub path: PathBuf,
    pub window: WindowId,
}

/// Owns the active-download registry and the collaborators every session uses
pub struct DownloadManager {
    ctx: SessionContext,
    next_id: AtomicU64,
}

impl DownloadManager {
    pub fn new(
        config: DownloadConfig,
        journal: Arc<dyn JournalStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            ctx: SessionContext {
                config: Arc::new(config),
                registry: ActiveDownloads::new(),
                journal,
                notifier,
                inspector: Arc::new(SignatureInspector),
            },
            next_id: AtomicU64::new(0),
        }
    }

    pub fn with_inspector(mut self, inspector: Arc<dyn ContentInspector>) -> Self {
        self.ctx.inspector = inspector;
        self
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.ctx.config
    }

    pub fn registry(&self) -> &ActiveDownloads {
        &self.ctx.registry
    }

    /// True when no download is active
    pub fn can_quit(&self) -> bool {
        self.ctx.registry.is_empty()
    }

    pub fn num_downloads(&self) -> usize {
        self.ctx.registry.count()
    }

    /// Cancel every active download; used at shutdown
    pub fn remove_all_downloads(&self) -> usize {
        self.ctx.registry.cancel_all()
    }

    /// Delete staged files older than the retention window
    pub fn remove_old_parts(&self) -> usize {
        StaleTempFileSweeper::new(self.ctx.config.temp_dir(), self.ctx.config.stale_part_max_age())
            .sweep()
    }

    /// Create an empty, uniquely named destination under `<activity_root>/instance`.
    ///
    /// The name keeps the stem and extension of `default_file`; without one,
    /// `suggested_extension` becomes the suffix.
    pub fn prepare_destination(
        &self,
        default_file: Option<&str>,
        suggested_extension: Option<&str>,
        window: WindowId,
    ) -> std::io::Result<PreparedDestination> {
        let (prefix, suffix) = match default_file.filter(|name| !name.is_empty()) {
            Some(name) => split_file_name(name),
            None => (
                String::new(),
                suggested_extension
                    .filter(|ext| !ext.is_empty())
                    .map(|ext| format!(".{}", ext))
                    .unwrap_or_default(),
            ),
        };

        let temp_dir = self.ctx.config.temp_dir();
        std::fs::create_dir_all(&temp_dir)?;

        let file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(&suffix)
            .tempfile_in(&temp_dir)?;
        let (_, path) = file.keep().map_err(|e| e.error)?;
        set_readable(&path)?;

        debug!("download_destination: {} window={:?}", path.display(), window);
        Ok(PreparedDestination { path, window })
    }

    /// Create the session for a transfer the engine just announced
    pub fn begin_transfer(&self, init: TransferInit) -> SessionHandle {
        let id: DownloadId = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "download_init: {} {} -> {}",
            id,
            init.source,
            init.destination.path.display()
        );
        SessionHandle::new(DownloadSession::spawn(id, init, self.ctx.clone()))
    }
}

/// Split a suggested file name into (stem, ".ext"), ignoring any directories
fn split_file_name(name: &str) -> (String, String) {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (stem, extension)
}

#[cfg(unix)]
fn set_readable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_readable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
