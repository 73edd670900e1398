//! Journal object store seam
//!
//! The journal is a content-addressed object store that outlives the
//! activity. Downloads create one object each, update its metadata while
//! the transfer runs and hand the finished file over on success.
//!
//! Stores never invoke a callback from inside the call that registered it:
//! write completions and deletion notices arrive later, on whatever thread
//! the store delivers results from.

pub mod local;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

pub use local::LocalJournal;

/// Metadata keys written by the download sessions
pub mod keys {
    pub const TITLE: &str = "title";
    pub const DESCRIPTION: &str = "description";
    pub const PROGRESS: &str = "progress";
    pub const KEEP: &str = "keep";
    pub const BUDDIES: &str = "buddies";
    pub const PREVIEW: &str = "preview";
    pub const ICON_COLOR: &str = "icon-color";
    pub const MIME_TYPE: &str = "mime_type";
}

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("journal object {0} does not exist")]
    NotFound(ObjectId),
    #[error("journal write timed out after {0:?}")]
    Timeout(Duration),
    #[error("journal store is closed")]
    Closed,
    #[error("journal storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Identifier of an object in the journal
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ObjectId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Local handle on a journal object: its id, string metadata and payload path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub object_id: ObjectId,
    pub metadata: BTreeMap<String, String>,
    pub file_path: Option<PathBuf>,
}

impl JournalEntry {
    pub fn new(object_id: ObjectId) -> Self {
        Self {
            object_id,
            metadata: BTreeMap::new(),
            file_path: None,
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// Completion of a confirmed write, called exactly once
pub type WriteCallback = Box<dyn FnOnce(Result<(), JournalError>) + Send + 'static>;

/// Deletion notice handler; receives the id of the deleted object
pub type DeletedCallback = Arc<dyn Fn(&ObjectId) + Send + Sync + 'static>;

/// A write whose outcome must be observed
pub struct Confirmation {
    pub timeout: Duration,
    pub on_done: WriteCallback,
}

/// How a write is submitted.
///
/// Without a confirmation the write is best effort and its outcome may be
/// ignored (progress updates). With one, the store reports success or
/// failure through `on_done` once the write settled or timed out.
pub struct WriteOptions {
    /// The store takes the payload file over (moves or copies it)
    pub transfer_ownership: bool,
    pub confirm: Option<Confirmation>,
}

impl WriteOptions {
    pub fn best_effort() -> Self {
        Self {
            transfer_ownership: false,
            confirm: None,
        }
    }

    pub fn confirmed(
        transfer_ownership: bool,
        timeout: Duration,
        on_done: impl FnOnce(Result<(), JournalError>) + Send + 'static,
    ) -> Self {
        Self {
            transfer_ownership,
            confirm: Some(Confirmation {
                timeout,
                on_done: Box::new(on_done),
            }),
        }
    }
}

impl std::fmt::Debug for WriteOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteOptions")
            .field("transfer_ownership", &self.transfer_ownership)
            .field("confirmed", &self.confirm.as_ref().map(|c| c.timeout))
            .finish()
    }
}

/// Operations a download session needs from the journal
pub trait JournalStore: Send + Sync {
    /// Allocate a new object with empty metadata; nothing is stored until the first write
    fn create(&self) -> JournalEntry;

    /// Submit a write of the entry's metadata and payload path; never blocks
    fn write(&self, entry: &JournalEntry, options: WriteOptions);

    /// Remove an object from the store. Fails when it is already gone.
    fn delete(&self, object_id: &ObjectId) -> Result<(), JournalError>;

    /// Release local resources held for an entry; the stored object is kept
    fn destroy(&self, entry: JournalEntry) {
        drop(entry);
    }

    /// Register for notice that `object_id` was deleted by anyone
    fn subscribe_deleted(&self, object_id: &ObjectId, on_deleted: DeletedCallback)
        -> Subscription;
}

/// Registration handle returned by `subscribe_deleted`.
///
/// `unsubscribe` may be called any number of times; dropping the handle
/// unsubscribes as well.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to release
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[derive(Default)]
struct SignalTable {
    next_token: u64,
    handlers: HashMap<ObjectId, Vec<(u64, DeletedCallback)>>,
}

/// Publish/subscribe table for deletion notices keyed by object id
#[derive(Clone, Default)]
pub struct DeletionSignals {
    table: Arc<Mutex<SignalTable>>,
}

impl DeletionSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, object_id: &ObjectId, on_deleted: DeletedCallback) -> Subscription {
        let token = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table.next_token += 1;
            let token = table.next_token;
            table
                .handlers
                .entry(object_id.clone())
                .or_default()
                .push((token, on_deleted));
            token
        };

        let table: Weak<Mutex<SignalTable>> = Arc::downgrade(&self.table);
        let object_id = object_id.clone();
        Subscription::new(move || {
            let Some(table) = table.upgrade() else {
                return;
            };
            let mut table = table.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(handlers) = table.handlers.get_mut(&object_id) {
                handlers.retain(|(t, _)| *t != token);
                if handlers.is_empty() {
                    table.handlers.remove(&object_id);
                }
            }
        })
    }

    /// Invoke every handler registered for `object_id`.
    ///
    /// Handlers run outside the table lock, so they may unsubscribe.
    pub fn emit(&self, object_id: &ObjectId) -> usize {
        let handlers: Vec<DeletedCallback> = {
            let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table
                .handlers
                .get(object_id)
                .map(|h| h.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default()
        };
        for handler in &handlers {
            handler(object_id);
        }
        handlers.len()
    }

    pub fn subscriber_count(&self, object_id: &ObjectId) -> usize {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.handlers.get(object_id).map_or(0, Vec::len)
    }
}
