//! Journal store persisted in a local turso database
//!
//! Every operation is queued to a single worker task so writes land in
//! submission order: a late progress update can never overwrite the final
//! metadata of a finished download.

use super::{
    Confirmation, DeletedCallback, DeletionSignals, JournalEntry, JournalError, JournalStore,
    ObjectId, Subscription, WriteOptions,
};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use turso::{Builder, Connection};

pub(crate) type DbResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const DB_FILE_NAME: &str = "journal.db";
const DATA_DIR_NAME: &str = "data";

enum StoreOp {
    Write {
        entry: JournalEntry,
        transfer_ownership: bool,
        confirm: Option<Confirmation>,
    },
    Delete {
        object_id: ObjectId,
    },
    Get {
        object_id: ObjectId,
        respond: oneshot::Sender<DbResult<Option<JournalEntry>>>,
    },
    List {
        respond: oneshot::Sender<DbResult<Vec<JournalEntry>>>,
    },
}

/// Get SQL for creating the journal tables
pub fn get_table_sql() -> &'static str {
    "
    CREATE TABLE IF NOT EXISTS journal_objects (
        id TEXT PRIMARY KEY,
        metadata TEXT NOT NULL,
        file_path TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_journal_objects_updated ON journal_objects(updated_at);
    "
}

/// Journal backed by `<root>/journal.db`, payload files under `<root>/data/`
pub struct LocalJournal {
    root: PathBuf,
    ops: mpsc::UnboundedSender<StoreOp>,
    known: Arc<Mutex<HashSet<ObjectId>>>,
    signals: DeletionSignals,
    runtime: Handle,
}

impl LocalJournal {
    /// Open (or create) the store and start its worker on the current runtime
    pub async fn open(root: &Path) -> Result<Self, JournalError> {
        let data_dir = root.join(DATA_DIR_NAME);
        tokio::fs::create_dir_all(&data_dir).await?;

        let conn = init_db(&root.join(DB_FILE_NAME)).await.map_err(storage)?;
        let ids = load_object_ids(&conn).await.map_err(storage)?;
        info!("journal_open: {} objects={}", root.display(), ids.len());

        let signals = DeletionSignals::new();
        let (ops, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_store_worker(conn, data_dir, receiver, signals.clone()));

        Ok(Self {
            root: root.to_path_buf(),
            ops,
            known: Arc::new(Mutex::new(ids.into_iter().collect())),
            signals,
            runtime: Handle::current(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR_NAME)
    }

    /// True when the object was written and not deleted since
    pub fn contains(&self, object_id: &ObjectId) -> bool {
        self.known().contains(object_id)
    }

    /// Read one object back, after every previously queued write landed
    pub async fn get(&self, object_id: &ObjectId) -> Result<Option<JournalEntry>, JournalError> {
        let (respond, response) = oneshot::channel();
        self.submit(StoreOp::Get {
            object_id: object_id.clone(),
            respond,
        })?;
        response
            .await
            .map_err(|_| JournalError::Closed)?
            .map_err(storage)
    }

    /// All stored objects, most recently updated first
    pub async fn list(&self) -> Result<Vec<JournalEntry>, JournalError> {
        let (respond, response) = oneshot::channel();
        self.submit(StoreOp::List { respond })?;
        response
            .await
            .map_err(|_| JournalError::Closed)?
            .map_err(storage)
    }

    /// Delete on behalf of the journal UI; subscribers are notified like for any deletion
    pub fn remove_entry(&self, object_id: &ObjectId) -> Result<(), JournalError> {
        self.delete(object_id)
    }

    fn known(&self) -> std::sync::MutexGuard<'_, HashSet<ObjectId>> {
        self.known.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn submit(&self, op: StoreOp) -> Result<(), JournalError> {
        self.ops.send(op).map_err(|_| JournalError::Closed)
    }
}

impl JournalStore for LocalJournal {
    fn create(&self) -> JournalEntry {
        let object_id = ObjectId::new(uuid::Uuid::new_v4().to_string());
        debug!("journal_create: {}", object_id);
        JournalEntry::new(object_id)
    }

    fn write(&self, entry: &JournalEntry, options: WriteOptions) {
        self.known().insert(entry.object_id.clone());

        let op = StoreOp::Write {
            entry: entry.clone(),
            transfer_ownership: options.transfer_ownership,
            confirm: options.confirm,
        };
        if let Err(mpsc::error::SendError(op)) = self.ops.send(op) {
            error!("journal_write_rejected: {} store closed", entry.object_id);
            if let StoreOp::Write {
                confirm: Some(confirm),
                ..
            } = op
            {
                // Completion must not run inside this call
                self.runtime.spawn(async move {
                    (confirm.on_done)(Err(JournalError::Closed));
                });
            }
        }
    }

    fn delete(&self, object_id: &ObjectId) -> Result<(), JournalError> {
        if !self.known().remove(object_id) {
            return Err(JournalError::NotFound(object_id.clone()));
        }
        self.submit(StoreOp::Delete {
            object_id: object_id.clone(),
        })
    }

    fn subscribe_deleted(
        &self,
        object_id: &ObjectId,
        on_deleted: DeletedCallback,
    ) -> Subscription {
        self.signals.subscribe(object_id, on_deleted)
    }
}

fn storage(e: Box<dyn std::error::Error + Send + Sync>) -> JournalError {
    JournalError::Storage(e.to_string())
}

async fn run_store_worker(
    conn: Connection,
    data_dir: PathBuf,
    mut receiver: mpsc::UnboundedReceiver<StoreOp>,
    signals: DeletionSignals,
) {
    let mut deleted: HashSet<ObjectId> = HashSet::new();

    while let Some(op) = receiver.recv().await {
        match op {
            StoreOp::Write {
                entry,
                transfer_ownership,
                confirm,
            } => {
                let write = async {
                    if deleted.contains(&entry.object_id) {
                        return Err(JournalError::NotFound(entry.object_id.clone()));
                    }
                    persist_entry(&conn, &data_dir, &entry, transfer_ownership).await
                };
                match confirm {
                    Some(Confirmation { timeout, on_done }) => {
                        let result = match tokio::time::timeout(timeout, write).await {
                            Ok(result) => result,
                            Err(_) => Err(JournalError::Timeout(timeout)),
                        };
                        if let Err(e) = &result {
                            warn!("journal_write_failed: {} {}", entry.object_id, e);
                        }
                        on_done(result);
                    }
                    None => {
                        if let Err(e) = write.await {
                            debug!("journal_write_dropped: {} {}", entry.object_id, e);
                        }
                    }
                }
            }
            StoreOp::Delete { object_id } => {
                deleted.insert(object_id.clone());
                if let Err(e) = delete_object(&conn, &data_dir, &object_id).await {
                    warn!("journal_delete_failed: {} {}", object_id, e);
                }
                let notified = signals.emit(&object_id);
                info!("journal_deleted: {} subscribers={}", object_id, notified);
            }
            StoreOp::Get { object_id, respond } => {
                let _ = respond.send(get_object(&conn, &object_id).await);
            }
            StoreOp::List { respond } => {
                let _ = respond.send(list_objects(&conn).await);
            }
        }
    }
    debug!("journal_worker_stopped: {}", data_dir.display());
}

async fn persist_entry(
    conn: &Connection,
    data_dir: &Path,
    entry: &JournalEntry,
    transfer_ownership: bool,
) -> Result<(), JournalError> {
    let mut file_path = entry
        .file_path
        .as_ref()
        .filter(|p| !p.as_os_str().is_empty())
        .cloned();

    if transfer_ownership {
        if let Some(source) = file_path.take() {
            let target = data_dir.join(entry.object_id.as_str());
            tokio::fs::copy(&source, &target).await?;
            debug!(
                "journal_payload_stored: {} {} -> {}",
                entry.object_id,
                source.display(),
                target.display()
            );
            file_path = Some(target);
        }
    }

    upsert_object(conn, entry, file_path.as_deref())
        .await
        .map_err(storage)
}

async fn init_db(db_path: &Path) -> DbResult<Connection> {
    let db = Builder::new_local(&db_path.to_string_lossy()).build().await?;
    let conn = db.connect()?;
    conn.execute_batch(get_table_sql()).await?;
    Ok(conn)
}

async fn load_object_ids(conn: &Connection) -> DbResult<Vec<ObjectId>> {
    let mut rows = conn
        .query("SELECT id FROM journal_objects", turso::params![])
        .await?;

    let mut ids = Vec::new();
    while let Some(row) = rows.next().await? {
        let id: String = row.get(0)?;
        ids.push(ObjectId::from(id));
    }
    Ok(ids)
}

async fn upsert_object(
    conn: &Connection,
    entry: &JournalEntry,
    file_path: Option<&Path>,
) -> DbResult<()> {
    let now = chrono::Utc::now().timestamp();
    let metadata = serde_json::to_string(&entry.metadata)?;
    let file_path = file_path.map(|p| p.to_string_lossy().into_owned());
    conn.execute(
        "INSERT INTO journal_objects (id, metadata, file_path, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT (id) DO UPDATE SET metadata = ?2, file_path = ?3, updated_at = ?4",
        turso::params![entry.object_id.as_str(), metadata.as_str(), file_path.as_deref(), now],
    )
    .await?;
    Ok(())
}

async fn delete_object(conn: &Connection, data_dir: &Path, object_id: &ObjectId) -> DbResult<()> {
    conn.execute(
        "DELETE FROM journal_objects WHERE id = ?1",
        turso::params![object_id.as_str()],
    )
    .await?;

    let payload = data_dir.join(object_id.as_str());
    match tokio::fs::remove_file(&payload).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn entry_from_parts(
    id: String,
    metadata: String,
    file_path: Option<String>,
) -> DbResult<JournalEntry> {
    let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata)?;
    Ok(JournalEntry {
        object_id: ObjectId::from(id),
        metadata,
        file_path: file_path.map(PathBuf::from),
    })
}

async fn get_object(conn: &Connection, object_id: &ObjectId) -> DbResult<Option<JournalEntry>> {
    let mut rows = conn
        .query(
            "SELECT id, metadata, file_path FROM journal_objects WHERE id = ?1",
            turso::params![object_id.as_str()],
        )
        .await?;

    if let Some(row) = rows.next().await? {
        Ok(Some(entry_from_parts(row.get(0)?, row.get(1)?, row.get(2)?)?))
    } else {
        Ok(None)
    }
}

async fn list_objects(conn: &Connection) -> DbResult<Vec<JournalEntry>> {
    let mut rows = conn
        .query(
            "SELECT id, metadata, file_path FROM journal_objects
             ORDER BY updated_at DESC",
            turso::params![],
        )
        .await?;

    let mut entries = Vec::new();
    while let Some(row) = rows.next().await? {
        entries.push(entry_from_parts(row.get(0)?, row.get(1)?, row.get(2)?)?);
    }
    Ok(entries)
}
