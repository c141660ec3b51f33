use std::path::Path;

use fs4::tokio::AsyncFileExt;
use tokio::fs::File;
use tracing::debug;

use super::error::StorageError;

const LOCK_FILE: &str = "mutation.lock";

/// Serializes mutations between processes of the same device, e.g. a running `watch` session
/// and a one-shot `stop` command. The lock file lives in the local state directory and never in
/// the shared folder, devices don't coordinate through it.
pub struct DeviceLock {
    file: File,
}

impl DeviceLock {
    pub async fn acquire(state_dir: &Path) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(state_dir)
            .await
            .map_err(|e| StorageError::io(state_dir, e))?;
        let path = state_dir.join(LOCK_FILE);
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        file.lock_exclusive()
            .map_err(|e| StorageError::io(&path, e))?;
        debug!("Acquired device lock {path:?}");
        Ok(Self { file })
    }

    pub async fn release(self) -> Result<(), StorageError> {
        self.file
            .unlock_async()
            .await
            .map_err(|e| StorageError::io(LOCK_FILE, e))
    }
}
