//! Alert seam towards the activity shell

use crate::journal::ObjectId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Opaque id of the browser window a download belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowId(pub u64);

/// Id handed out by the notifier for a posted alert
pub type AlertId = u64;

/// Action the user picked on an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertResponse {
    #[serde(rename = "cancel")]
    Cancel,
    #[serde(rename = "show_in_journal")]
    ShowInJournal,
    #[serde(rename = "ok")]
    Ok,
    /// Auto-dismiss timer ran out
    #[serde(rename = "timeout")]
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertAction {
    pub response: AlertResponse,
    pub label: String,
    pub icon: String,
}

impl AlertAction {
    pub fn new(response: AlertResponse, label: &str, icon: &str) -> Self {
        Self {
            response,
            label: label.to_string(),
            icon: icon.to_string(),
        }
    }
}

/// A dismissible alert with ordered action buttons
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub actions: Vec<AlertAction>,
    pub auto_dismiss_after: Option<Duration>,
}

/// Receives the user's choice; delivered once per alert, never from inside `post`
pub type ResponseCallback = Arc<dyn Fn(AlertId, AlertResponse) + Send + Sync + 'static>;

/// Operations sessions need from the shell's alert area
pub trait Notifier: Send + Sync {
    fn post(&self, window: WindowId, alert: Alert, on_response: ResponseCallback) -> AlertId;

    /// Take an alert off screen; unknown ids are ignored
    fn remove(&self, window: WindowId, alert_id: AlertId);

    /// Bring the journal forward with `object_id` selected
    fn show_in_journal(&self, object_id: &ObjectId);
}
