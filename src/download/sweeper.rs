//! Startup housekeeping for staged download files

use log::{debug, warn};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// Deletes entries of one directory (not recursive) older than `max_age`
#[derive(Debug, Clone)]
pub struct StaleTempFileSweeper {
    dir: PathBuf,
    max_age: Duration,
}

impl StaleTempFileSweeper {
    pub fn new(dir: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            dir: dir.into(),
            max_age,
        }
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(SystemTime::now())
    }

    /// Sweep as if the current time were `now`; returns how many files were removed
    pub fn sweep_at(&self, now: SystemTime) -> usize {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("sweep_skipped: {} does not exist", self.dir.display());
                return 0;
            }
            Err(e) => {
                warn!("sweep_failed: {} {}", self.dir.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("sweep_stat_failed: {} {}", path.display(), e);
                    continue;
                }
            };
            if metadata.is_dir() {
                continue;
            }
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= self.max_age {
                continue;
            }

            debug!("removing {}", path.display());
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("sweep_remove_failed: {} {}", path.display(), e),
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    const DAY: Duration = Duration::from_secs(86400);

    fn touch(path: &std::path::Path, modified: SystemTime) {
        let file = File::create(path).unwrap();
        file.set_modified(modified).unwrap();
    }

    #[test]
    fn removes_only_entries_past_retention() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let old = dir.path().join("old.part");
        let fresh = dir.path().join("fresh.part");
        touch(&old, now - 2 * DAY);
        touch(&fresh, now - Duration::from_secs(3600));

        let removed = StaleTempFileSweeper::new(dir.path(), DAY).sweep_at(now);

        assert_eq!(removed, 1);
        assert!(!old.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn missing_directory_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let sweeper = StaleTempFileSweeper::new(dir.path().join("instance"), DAY);
        assert_eq!(sweeper.sweep(), 0);
    }

    #[test]
    fn does_not_descend_into_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        let inner = nested.join("inner.part");
        let now = SystemTime::now();
        touch(&inner, now - 3 * DAY);

        let removed = StaleTempFileSweeper::new(dir.path(), DAY).sweep_at(now);

        assert_eq!(removed, 0);
        assert!(inner.exists());
    }
}
