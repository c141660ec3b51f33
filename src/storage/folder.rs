use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::StorageError;

const CONFIG_FILE: &str = "config.json";
const ENTRIES_DIR: &str = "time-entries";
const ENTRIES_FILE: &str = "entries.json";
const TIMESHEETS_DIR: &str = "timesheets";

/// Layout of the user chosen folder that is shared between devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFolder {
    root: PathBuf,
}

impl SharedFolder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn entries_path(&self) -> PathBuf {
        self.root.join(ENTRIES_DIR).join(ENTRIES_FILE)
    }

    pub fn timesheets_dir(&self) -> PathBuf {
        self.root.join(TIMESHEETS_DIR)
    }

    /// Creates the directory structure. Safe to call any number of times from any device.
    pub async fn ensure_layout(&self) -> Result<(), StorageError> {
        for dir in [self.root.join(ENTRIES_DIR), self.timesheets_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| StorageError::io(&dir, e))?;
        }
        debug!("Layout of {:?} is in place", self.root);
        Ok(())
    }
}
