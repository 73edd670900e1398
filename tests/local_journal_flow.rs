mod common;

use common::{init_logging, write_file, FakeTransfer, RecordingNotifier, WINDOW};
use journal_downloads::download::CANCEL_STATUS;
use journal_downloads::journal::keys;
use journal_downloads::{
    DownloadConfig, DownloadManager, LocalJournal, SessionHandle, SessionState, StateFlag,
    TransferInit, TransferListener, TransferStatus,
};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

async fn wait_for_state(session: &SessionHandle, state: SessionState) {
    for _ in 0..200 {
        if session.state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session stuck in {}", session.state());
}

struct Setup {
    _dir: tempfile::TempDir,
    journal: Arc<LocalJournal>,
    manager: DownloadManager,
}

async fn setup() -> Setup {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let journal = Arc::new(LocalJournal::open(&dir.path().join("journal")).await.unwrap());
    let manager = DownloadManager::new(
        DownloadConfig::with_activity_root(dir.path().join("activity")),
        journal.clone(),
        Arc::new(RecordingNotifier::default()),
    );
    Setup {
        _dir: dir,
        journal,
        manager,
    }
}

fn begin(manager: &DownloadManager, name: &str) -> (SessionHandle, FakeTransfer) {
    let transfer = FakeTransfer::default();
    let destination = manager.prepare_destination(Some(name), None, WINDOW).unwrap();
    let session = manager.begin_transfer(TransferInit {
        source: Url::parse(&format!("https://example.org/media/{}", name)).unwrap(),
        destination,
        display_name: None,
        mime_type: "application/octet-stream".to_string(),
        temp_file: None,
        cancel: Box::new(transfer.clone()),
    });
    (session, transfer)
}

#[tokio::test]
async fn completed_download_lands_in_the_journal() {
    let s = setup().await;
    let (session, transfer) = begin(&s.manager, "clip.pdf");
    session.on_state_change(StateFlag::Start, TransferStatus::Ok);
    let object_id = session.journal_object_id().unwrap();
    let destination = session.destination();

    session.on_progress(512, 1024);
    write_file(&destination, b"%PDF-1.7 body");
    session.on_state_change(StateFlag::Stop, TransferStatus::Ok);

    wait_for_state(&session, SessionState::CleanedUp).await;
    assert!(s.manager.can_quit());
    assert!(!destination.exists());
    assert!(transfer.cancels().is_empty());

    let stored = s.journal.get(&object_id).await.unwrap().unwrap();
    assert_eq!(stored.get(keys::TITLE), Some("clip.pdf"));
    assert_eq!(stored.get(keys::PROGRESS), Some("100"));
    assert_eq!(stored.get(keys::MIME_TYPE), Some("application/pdf"));
    let payload = stored.file_path.unwrap();
    assert_eq!(payload, s.journal.data_dir().join(object_id.as_str()));
    assert_eq!(std::fs::read(payload).unwrap(), b"%PDF-1.7 body");
}

#[tokio::test]
async fn removing_the_entry_cancels_the_running_download() {
    let s = setup().await;
    let (session, transfer) = begin(&s.manager, "big.iso");
    session.on_state_change(StateFlag::Start, TransferStatus::Ok);
    session.on_progress(10, 100);
    let object_id = session.journal_object_id().unwrap();

    s.journal.remove_entry(&object_id).unwrap();

    wait_for_state(&session, SessionState::CleanedUp).await;
    assert_eq!(transfer.cancels(), vec![CANCEL_STATUS]);
    assert!(s.manager.can_quit());
    assert!(!s.journal.contains(&object_id));
    assert!(s.journal.get(&object_id).await.unwrap().is_none());
}

#[tokio::test]
async fn failed_download_leaves_nothing_behind() {
    let s = setup().await;
    let (session, _) = begin(&s.manager, "broken.zip");
    session.on_state_change(StateFlag::Start, TransferStatus::Ok);
    let object_id = session.journal_object_id().unwrap();

    session.on_state_change(StateFlag::Stop, TransferStatus::Failed(0x8000_4005));

    assert_eq!(session.state(), SessionState::CleanedUp);
    assert!(s.journal.get(&object_id).await.unwrap().is_none());
    assert!(s.journal.list().await.unwrap().is_empty());
}
