//! Per-download state machine
//!
//! A session is created when the engine announces a transfer and is driven
//! by three kinds of input: engine callbacks (start, progress, stop), the
//! user's answers to its alerts, and deletion notices from the journal.
//! Every path ends in `cleanup`, which runs at most once.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;
use url::Url;

use super::manager::PreparedDestination;
use super::registry::ActiveDownloads;
use super::throttle::{percent_of, ProgressThrottle};
use super::types::{
    AbortReason, DownloadId, SessionState, StateFlag, TransferStatus, CANCEL_STATUS,
    DATA_URI_NAME, GENERIC_MIME_TYPES, LABEL_CANCEL, LABEL_OK, LABEL_SHOW_IN_JOURNAL,
    TITLE_DOWNLOAD_COMPLETED, TITLE_DOWNLOAD_STARTED,
};
use crate::config::DownloadConfig;
use crate::content::ContentInspector;
use crate::journal::{
    keys, JournalEntry, JournalError, JournalStore, ObjectId, Subscription, WriteOptions,
};
use crate::notify::{
    Alert, AlertAction, AlertId, AlertResponse, Notifier, ResponseCallback, WindowId,
};

pub type SharedSession = Arc<Mutex<DownloadSession>>;

pub(crate) fn lock_session(session: &SharedSession) -> MutexGuard<'_, DownloadSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

fn with_session(session: &Weak<Mutex<DownloadSession>>, f: impl FnOnce(&mut DownloadSession)) {
    if let Some(session) = session.upgrade() {
        f(&mut *lock_session(&session));
    }
}

/// Capability to abort the underlying transfer
pub trait TransferHandle: Send + Sync {
    fn cancel(&self, status: u32);
}

/// The three engine callbacks a transfer reports through
pub trait TransferListener: Send + Sync {
    fn on_state_change(&self, flag: StateFlag, status: TransferStatus);

    fn on_progress(&self, current: i64, max: i64);

    fn on_status_change(&self, status: u32, message: &str) {
        info!("download_status: {:#x} {}", status, message);
    }
}

/// Everything the engine tells us when a transfer is created
pub struct TransferInit {
    pub source: Url,
    pub destination: PreparedDestination,
    pub display_name: Option<String>,
    pub mime_type: String,
    /// In-progress artifact the engine writes next to the destination, if any
    pub temp_file: Option<PathBuf>,
    pub cancel: Box<dyn TransferHandle>,
}

/// Collaborators shared by all sessions of a manager
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub config: Arc<DownloadConfig>,
    pub registry: ActiveDownloads,
    pub journal: Arc<dyn JournalStore>,
    pub notifier: Arc<dyn Notifier>,
    pub inspector: Arc<dyn ContentInspector>,
}

pub struct DownloadSession {
    id: DownloadId,
    this: Weak<Mutex<DownloadSession>>,
    source: Url,
    destination: PathBuf,
    temp_file: Option<PathBuf>,
    display_name: Option<String>,
    mime_type: String,
    window: WindowId,
    cancel: Box<dyn TransferHandle>,
    /// Live only between start and cleanup
    entry: Option<JournalEntry>,
    /// Kept after cleanup so "Show in Journal" still works
    object_id: Option<ObjectId>,
    throttle: ProgressThrottle,
    state: SessionState,
    deleted_sub: Option<Subscription>,
    start_alert: Option<AlertId>,
    stop_alert: Option<AlertId>,
    ctx: SessionContext,
}

impl DownloadSession {
    pub(crate) fn spawn(id: DownloadId, init: TransferInit, ctx: SessionContext) -> SharedSession {
        let throttle = ProgressThrottle::new(
            ctx.config.min_update_interval(),
            ctx.config.min_update_percent,
        );
        Arc::new_cyclic(|this| {
            Mutex::new(Self {
                id,
                this: this.clone(),
                source: init.source,
                destination: init.destination.path,
                temp_file: init.temp_file,
                display_name: init.display_name,
                mime_type: init.mime_type,
                window: init.destination.window,
                cancel: init.cancel,
                entry: None,
                object_id: None,
                throttle,
                state: SessionState::Init,
                deleted_sub: None,
                start_alert: None,
                stop_alert: None,
                ctx,
            })
        })
    }

    pub fn id(&self) -> DownloadId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn source(&self) -> &Url {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Id of the journal object, while the session holds one
    pub fn journal_object_id(&self) -> Option<&ObjectId> {
        self.entry.as_ref().map(|entry| &entry.object_id)
    }

    pub fn file_name(&self) -> String {
        match self.display_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => file_name_for(&self.source),
        }
    }

    pub(crate) fn start(&mut self) {
        if self.state != SessionState::Init {
            warn!("download_start_ignored: {} state={}", self.id, self.state);
            return;
        }

        let name = self.file_name();
        let mut entry = self.ctx.journal.create();
        entry.set(keys::TITLE, format!("Downloading {} from \n{}.", name, self.source));
        entry.set(keys::PROGRESS, "0");
        entry.set(keys::KEEP, "0");
        entry.set(keys::BUDDIES, "");
        entry.set(keys::PREVIEW, "");
        entry.set(keys::ICON_COLOR, self.ctx.config.icon_color.as_str());
        entry.set(keys::MIME_TYPE, self.mime_type.as_str());
        entry.file_path = None;
        self.ctx.journal.write(&entry, WriteOptions::best_effort());

        let object_id = entry.object_id.clone();
        let this = self.this.clone();
        self.deleted_sub = Some(self.ctx.journal.subscribe_deleted(
            &object_id,
            Arc::new(move |deleted: &ObjectId| {
                with_session(&this, |session| session.on_journal_deleted(deleted));
            }),
        ));
        self.object_id = Some(object_id.clone());
        self.entry = Some(entry);
        self.state = SessionState::Started;
        if let Some(shared) = self.this.upgrade() {
            self.ctx.registry.add(self.id, shared);
        }

        let alert = Alert {
            title: TITLE_DOWNLOAD_STARTED.to_string(),
            message: name,
            actions: vec![AlertAction::new(
                AlertResponse::Cancel,
                LABEL_CANCEL,
                "dialog-cancel",
            )],
            auto_dismiss_after: Some(self.ctx.config.start_alert_timeout()),
        };
        let on_response = self.alert_callback(DownloadSession::on_start_alert_response);
        self.start_alert = Some(self.ctx.notifier.post(self.window, alert, on_response));

        info!(
            "download_started: {} object={} source={}",
            self.id, object_id, self.source
        );
    }

    pub(crate) fn progress(&mut self, current: i64, max: i64) {
        if !self.state.is_transferring() {
            debug!("download_progress_ignored: {} state={}", self.id, self.state);
            return;
        }
        let Some(percent) = percent_of(current, max) else {
            debug!("download_progress_indeterminate: {} bytes={}", self.id, current);
            return;
        };

        self.state = SessionState::InProgress;
        if !self.throttle.should_emit(percent, Instant::now()) {
            debug!("download_progress_throttled: {} percent={}", self.id, percent);
            return;
        }
        if percent >= 100 {
            return;
        }

        if let Some(entry) = self.entry.as_mut() {
            entry.set(keys::PROGRESS, percent.to_string());
            self.ctx.journal.write(entry, WriteOptions::best_effort());
            debug!("download_progress: {} percent={}", self.id, percent);
        }
    }

    pub(crate) fn stop(&mut self, status: TransferStatus) {
        if !self.state.is_transferring() {
            debug!("download_stop_ignored: {} state={}", self.id, self.state);
            return;
        }

        if let TransferStatus::Failed(code) = status {
            info!("download_failed: {} status={:#x}", self.id, code);
            self.state = SessionState::StoppedFailed;
            self.delete_journal_object();
            self.cleanup();
            return;
        }

        self.state = SessionState::StoppedOk;
        let Some(mut entry) = self.entry.take() else {
            warn!("download_finished_without_object: {}", self.id);
            self.cleanup();
            return;
        };
        let name = self.file_name();

        let alert = Alert {
            title: TITLE_DOWNLOAD_COMPLETED.to_string(),
            message: name.clone(),
            actions: vec![
                AlertAction::new(
                    AlertResponse::ShowInJournal,
                    LABEL_SHOW_IN_JOURNAL,
                    "zoom-activity",
                ),
                AlertAction::new(AlertResponse::Ok, LABEL_OK, "dialog-ok"),
            ],
            auto_dismiss_after: None,
        };
        let on_response = self.alert_callback(DownloadSession::on_stop_alert_response);
        self.stop_alert = Some(self.ctx.notifier.post(self.window, alert, on_response));

        entry.set(keys::TITLE, name);
        entry.set(keys::DESCRIPTION, format!("From: {}", self.source));
        entry.set(keys::PROGRESS, "100");
        entry.file_path = Some(self.destination.clone());

        let mut mime_type = self.mime_type.clone();
        if GENERIC_MIME_TYPES.contains(&mime_type.as_str()) {
            if let Some(sniffed) = self.ctx.inspector.sniff_mime_type(&self.destination) {
                debug!("download_mime_sniffed: {} {} -> {}", self.id, mime_type, sniffed);
                entry.set(keys::MIME_TYPE, sniffed.as_str());
                mime_type = sniffed;
            }
        }
        if self.ctx.inspector.is_raster_image(&mime_type) {
            if let Some(png) = self.ctx.inspector.render_preview(&self.destination) {
                entry.set(keys::PREVIEW, BASE64.encode(png));
            }
        }

        let this = self.this.clone();
        let options = WriteOptions::confirmed(
            true,
            self.ctx.config.final_write_timeout(),
            move |result| with_session(&this, |session| session.on_final_write(result)),
        );
        self.ctx.journal.write(&entry, options);

        info!(
            "download_finished: {} object={} path={}",
            self.id,
            entry.object_id,
            self.destination.display()
        );
        self.entry = Some(entry);
    }

    /// Outcome of the confirmed final write; cleanup follows either way
    pub fn on_final_write(&mut self, result: Result<(), JournalError>) {
        match result {
            Ok(()) => info!("download_saved: {} state={}", self.id, self.state),
            Err(e) => error!("download_save_failed: {} {}", self.id, e),
        }
        self.cleanup();
    }

    /// Out-of-band deletion of this session's journal object
    pub fn on_journal_deleted(&mut self, object_id: &ObjectId) {
        debug!("download_object_deleted: {} object={}", self.id, object_id);
        self.abort(AbortReason::JournalDeleted);
    }

    pub fn on_start_alert_response(&mut self, alert_id: AlertId, response: AlertResponse) {
        if response == AlertResponse::Cancel {
            self.abort(AbortReason::User);
        }
        if self.start_alert == Some(alert_id) {
            self.start_alert = None;
        }
        self.ctx.notifier.remove(self.window, alert_id);
    }

    pub fn on_stop_alert_response(&mut self, alert_id: AlertId, response: AlertResponse) {
        if response == AlertResponse::ShowInJournal {
            if let Some(object_id) = self.object_id.as_ref() {
                debug!("download_show_in_journal: {} object={}", self.id, object_id);
                self.ctx.notifier.show_in_journal(object_id);
            }
        }
        if self.stop_alert == Some(alert_id) {
            self.stop_alert = None;
        }
        self.ctx.notifier.remove(self.window, alert_id);
    }

    /// Abort the transfer, drop the journal object and clean up.
    ///
    /// Only acts while the session is registered as active; returns whether it did.
    pub fn abort(&mut self, reason: AbortReason) -> bool {
        if !self.ctx.registry.contains(self.id) {
            debug!(
                "download_abort_ignored: {} reason={} state={}",
                self.id, reason, self.state
            );
            return false;
        }

        info!(
            "download_cancelled: {} reason={} state={}",
            self.id, reason, self.state
        );
        self.cancel.cancel(CANCEL_STATUS);
        self.delete_journal_object();
        if let Some(alert_id) = self.stop_alert.take() {
            self.ctx.notifier.remove(self.window, alert_id);
        }
        self.state = SessionState::Cancelled;
        self.cleanup();
        true
    }

    /// Release everything the session holds. Safe to call repeatedly.
    pub fn cleanup(&mut self) {
        if self.state == SessionState::CleanedUp {
            debug!("download_cleanup_skipped: {}", self.id);
            return;
        }

        self.ctx.registry.remove(self.id);

        if let Some(mut subscription) = self.deleted_sub.take() {
            subscription.unsubscribe();
        }

        remove_if_file(&self.destination);
        remove_if_file(&part_path(&self.destination));
        if let Some(temp_file) = self.temp_file.as_deref() {
            remove_if_file(temp_file);
        }

        if let Some(entry) = self.entry.take() {
            self.ctx.journal.destroy(entry);
        }

        let previous = std::mem::replace(&mut self.state, SessionState::CleanedUp);
        info!("download_cleaned_up: {} from={}", self.id, previous);
    }

    /// Alert response handler; holds the session until the notifier drops it
    fn alert_callback(
        &self,
        on_response: fn(&mut DownloadSession, AlertId, AlertResponse),
    ) -> ResponseCallback {
        let session = self.this.upgrade();
        Arc::new(move |alert_id: AlertId, response: AlertResponse| {
            if let Some(session) = session.as_ref() {
                on_response(&mut *lock_session(session), alert_id, response);
            }
        })
    }

    fn delete_journal_object(&self) {
        let Some(entry) = self.entry.as_ref() else {
            return;
        };
        match self.ctx.journal.delete(&entry.object_id) {
            Ok(()) => debug!("download_object_delete: {} object={}", self.id, entry.object_id),
            Err(e) => warn!(
                "download_object_delete_failed: {} object={} {}",
                self.id, entry.object_id, e
            ),
        }
    }
}

/// Shared handle the host binding keeps for one transfer
#[derive(Clone)]
pub struct SessionHandle {
    inner: SharedSession,
}

impl SessionHandle {
    pub(crate) fn new(inner: SharedSession) -> Self {
        Self { inner }
    }

    fn session(&self) -> MutexGuard<'_, DownloadSession> {
        lock_session(&self.inner)
    }

    pub fn id(&self) -> DownloadId {
        self.session().id()
    }

    pub fn state(&self) -> SessionState {
        self.session().state()
    }

    pub fn journal_object_id(&self) -> Option<ObjectId> {
        self.session().journal_object_id().cloned()
    }

    pub fn destination(&self) -> PathBuf {
        self.session().destination().to_path_buf()
    }

    pub fn file_name(&self) -> String {
        self.session().file_name()
    }

    /// Release the session without touching the transfer, e.g. when the
    /// engine drops a transfer that never started
    pub fn close(&self) {
        self.session().cleanup();
    }

    pub fn shared(&self) -> SharedSession {
        self.inner.clone()
    }
}

impl TransferListener for SessionHandle {
    fn on_state_change(&self, flag: StateFlag, status: TransferStatus) {
        let mut session = self.session();
        match flag {
            StateFlag::Start => session.start(),
            StateFlag::Stop => session.stop(status),
        }
    }

    fn on_progress(&self, current: i64, max: i64) {
        self.session().progress(current, max);
    }
}

/// Name shown for a download that has no display name
pub fn file_name_for(source: &Url) -> String {
    if source.scheme() == "data" {
        return DATA_URI_NAME.to_string();
    }
    let segment = source
        .path_segments()
        .and_then(|segments| segments.last())
        .unwrap_or("");
    urlencoding::decode(segment)
        .map(|name| name.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

fn part_path(destination: &Path) -> PathBuf {
    let mut path = destination.as_os_str().to_owned();
    path.push(".part");
    PathBuf::from(path)
}

fn remove_if_file(path: &Path) {
    if !path.is_file() {
        return;
    }
    match std::fs::remove_file(path) {
        Ok(()) => debug!("download_file_removed: {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("download_file_remove_failed: {} {}", path.display(), e),
    }
}
