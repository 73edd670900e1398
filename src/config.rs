use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory under the activity root where downloads are staged
pub const INSTANCE_DIR_NAME: &str = "instance";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub activity_root: PathBuf,
    pub min_update_interval_secs: u64,
    pub min_update_percent: i64,
    pub stale_part_max_age_secs: u64,
    pub start_alert_timeout_secs: u64,
    pub final_write_timeout_secs: u64,
    /// Owner colour tag stored with every journal object ("stroke,fill")
    pub icon_color: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            activity_root: PathBuf::from("."),
            min_update_interval_secs: 5,
            min_update_percent: 10,
            stale_part_max_age_secs: 86400,
            start_alert_timeout_secs: 9,
            final_write_timeout_secs: 360,
            icon_color: "#FF2B34,#005FE4".to_string(),
        }
    }
}

impl DownloadConfig {
    pub fn with_activity_root(activity_root: impl Into<PathBuf>) -> Self {
        Self {
            activity_root: activity_root.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {}: {}", path.display(), e))?;
        Self::from_json_str(&content)
            .map_err(|e| format!("Failed to parse config {}: {}", path.display(), e))
    }

    /// `<activity_root>/instance`
    pub fn temp_dir(&self) -> PathBuf {
        self.activity_root.join(INSTANCE_DIR_NAME)
    }

    pub fn min_update_interval(&self) -> Duration {
        Duration::from_secs(self.min_update_interval_secs)
    }

    pub fn stale_part_max_age(&self) -> Duration {
        Duration::from_secs(self.stale_part_max_age_secs)
    }

    pub fn start_alert_timeout(&self) -> Duration {
        Duration::from_secs(self.start_alert_timeout_secs)
    }

    pub fn final_write_timeout(&self) -> Duration {
        Duration::from_secs(self.final_write_timeout_secs)
    }
}
