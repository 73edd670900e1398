//! Download handling for the embedded browser
//!
//! Provides the glue between the engine's transfer callbacks and the journal:
//! - One `DownloadSession` state machine per transfer
//! - Throttled progress writes, one confirmed write on completion
//! - Start/completion alerts with cancel and "Show in Journal" actions
//! - Process-wide registry for quit checks and shutdown cancellation
//! - Startup sweep of stale staged files

mod manager;
mod registry;
mod session;
mod sweeper;
mod throttle;
mod types;

pub use manager::{DownloadManager, PreparedDestination};
pub use registry::ActiveDownloads;
pub use session::{
    file_name_for, DownloadSession, SessionHandle, SharedSession, TransferHandle, TransferInit,
    TransferListener,
};
pub use sweeper::StaleTempFileSweeper;
pub use throttle::{percent_of, ProgressThrottle, MIN_PERCENT_UPDATE, MIN_TIME_UPDATE};
pub use types::{
    AbortReason, DownloadId, SessionState, StateFlag, TransferStatus, CANCEL_STATUS,
    GENERIC_MIME_TYPES, NS_BINDING_ABORTED, NS_ERROR_FAILURE, NS_ERROR_SAVE_LINK_AS_TIMEOUT,
};
