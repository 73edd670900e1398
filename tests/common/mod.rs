#![allow(dead_code)]

use journal_downloads::journal::{
    DeletedCallback, DeletionSignals, JournalEntry, JournalError, JournalStore, ObjectId,
    Subscription, WriteCallback, WriteOptions,
};
use journal_downloads::notify::{Alert, AlertId, AlertResponse, Notifier, ResponseCallback, WindowId};
use journal_downloads::{
    DownloadConfig, DownloadManager, SessionHandle, TransferHandle, TransferInit,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use url::Url;

pub const WINDOW: WindowId = WindowId(7);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone)]
pub struct RecordedWrite {
    pub entry: JournalEntry,
    pub confirmed: bool,
    pub transfer_ownership: bool,
}

/// Journal double that records every call and holds confirmations until released
#[derive(Default)]
pub struct RecordingJournal {
    next_id: AtomicU64,
    writes: Mutex<Vec<RecordedWrite>>,
    confirmations: Mutex<Vec<WriteCallback>>,
    deletes: Mutex<Vec<ObjectId>>,
    destroyed: Mutex<Vec<ObjectId>>,
    failing_deletes: Mutex<HashSet<ObjectId>>,
    signals: DeletionSignals,
}

impl RecordingJournal {
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().unwrap().clone()
    }

    pub fn last_write(&self) -> RecordedWrite {
        self.writes().last().cloned().expect("no journal write recorded")
    }

    pub fn confirmed_writes(&self) -> Vec<RecordedWrite> {
        self.writes().into_iter().filter(|w| w.confirmed).collect()
    }

    pub fn take_confirmations(&self) -> Vec<WriteCallback> {
        std::mem::take(&mut *self.confirmations.lock().unwrap())
    }

    /// Resolve every pending confirmed write with `result`
    pub fn settle(&self, ok: bool) {
        for on_done in self.take_confirmations() {
            if ok {
                on_done(Ok(()));
            } else {
                on_done(Err(JournalError::Storage("disk full".to_string())));
            }
        }
    }

    pub fn deletes(&self) -> Vec<ObjectId> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn destroyed(&self) -> Vec<ObjectId> {
        self.destroyed.lock().unwrap().clone()
    }

    pub fn fail_delete_of(&self, object_id: &ObjectId) {
        self.failing_deletes.lock().unwrap().insert(object_id.clone());
    }

    /// Deliver an out-of-band deletion notice; returns how many handlers ran
    pub fn emit_deleted(&self, object_id: &ObjectId) -> usize {
        self.signals.emit(object_id)
    }

    pub fn subscribers(&self, object_id: &ObjectId) -> usize {
        self.signals.subscriber_count(object_id)
    }
}

impl JournalStore for RecordingJournal {
    fn create(&self) -> JournalEntry {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        JournalEntry::new(ObjectId::new(format!("obj-{}", n)))
    }

    fn write(&self, entry: &JournalEntry, options: WriteOptions) {
        self.writes.lock().unwrap().push(RecordedWrite {
            entry: entry.clone(),
            confirmed: options.confirm.is_some(),
            transfer_ownership: options.transfer_ownership,
        });
        if let Some(confirm) = options.confirm {
            self.confirmations.lock().unwrap().push(confirm.on_done);
        }
    }

    fn delete(&self, object_id: &ObjectId) -> Result<(), JournalError> {
        self.deletes.lock().unwrap().push(object_id.clone());
        if self.failing_deletes.lock().unwrap().contains(object_id) {
            return Err(JournalError::Storage("bus error".to_string()));
        }
        Ok(())
    }

    fn destroy(&self, entry: JournalEntry) {
        self.destroyed.lock().unwrap().push(entry.object_id);
    }

    fn subscribe_deleted(
        &self,
        object_id: &ObjectId,
        on_deleted: DeletedCallback,
    ) -> Subscription {
        self.signals.subscribe(object_id, on_deleted)
    }
}

#[derive(Clone)]
pub struct PostedAlert {
    pub id: AlertId,
    pub window: WindowId,
    pub alert: Alert,
    on_response: ResponseCallback,
}

/// Notifier double; responses are delivered by the test through `respond`
#[derive(Default)]
pub struct RecordingNotifier {
    next_id: AtomicU64,
    posted: Mutex<Vec<PostedAlert>>,
    removed: Mutex<Vec<AlertId>>,
    shown: Mutex<Vec<ObjectId>>,
}

impl RecordingNotifier {
    pub fn posted(&self) -> Vec<PostedAlert> {
        self.posted.lock().unwrap().clone()
    }

    pub fn alert_titled(&self, title: &str) -> Option<PostedAlert> {
        self.posted().into_iter().find(|p| p.alert.title == title)
    }

    pub fn removed(&self) -> Vec<AlertId> {
        self.removed.lock().unwrap().clone()
    }

    pub fn shown(&self) -> Vec<ObjectId> {
        self.shown.lock().unwrap().clone()
    }

    pub fn respond(&self, alert_id: AlertId, response: AlertResponse) {
        let on_response = self
            .posted()
            .into_iter()
            .find(|p| p.id == alert_id)
            .map(|p| p.on_response)
            .expect("unknown alert");
        on_response(alert_id, response);
    }
}

impl Notifier for RecordingNotifier {
    fn post(&self, window: WindowId, alert: Alert, on_response: ResponseCallback) -> AlertId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.posted.lock().unwrap().push(PostedAlert {
            id,
            window,
            alert,
            on_response,
        });
        id
    }

    fn remove(&self, _window: WindowId, alert_id: AlertId) {
        self.removed.lock().unwrap().push(alert_id);
    }

    fn show_in_journal(&self, object_id: &ObjectId) {
        self.shown.lock().unwrap().push(object_id.clone());
    }
}

/// Transfer handle that records cancellation codes
#[derive(Clone, Default)]
pub struct FakeTransfer {
    cancels: Arc<Mutex<Vec<u32>>>,
}

impl FakeTransfer {
    pub fn cancels(&self) -> Vec<u32> {
        self.cancels.lock().unwrap().clone()
    }
}

impl TransferHandle for FakeTransfer {
    fn cancel(&self, status: u32) {
        self.cancels.lock().unwrap().push(status);
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub journal: Arc<RecordingJournal>,
    pub notifier: Arc<RecordingNotifier>,
    pub manager: DownloadManager,
}

impl Harness {
    pub fn new() -> Self {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(RecordingJournal::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let manager = DownloadManager::new(
            DownloadConfig::with_activity_root(dir.path()),
            journal.clone(),
            notifier.clone(),
        );
        Self {
            dir,
            journal,
            notifier,
            manager,
        }
    }

    pub fn begin(&self, source: &str, display_name: Option<&str>, mime_type: &str) -> (SessionHandle, FakeTransfer) {
        let transfer = FakeTransfer::default();
        let destination = self
            .manager
            .prepare_destination(display_name, None, WINDOW)
            .unwrap();
        let session = self.manager.begin_transfer(TransferInit {
            source: Url::parse(source).unwrap(),
            destination,
            display_name: display_name.map(str::to_string),
            mime_type: mime_type.to_string(),
            temp_file: None,
            cancel: Box::new(transfer.clone()),
        });
        (session, transfer)
    }
}

pub fn write_file(path: &Path, content: &[u8]) {
    std::fs::write(path, content).unwrap();
}
