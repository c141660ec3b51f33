use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::fs::operations::{read_json_file, replace_file, to_json_bytes};

use super::{entities::TimeEntry, error::StorageError, folder::SharedFolder};

/// Interface for abstracting storage of the entry snapshot. The snapshot is always read and
/// written as a whole, there is no notion of a change log or of the running timer here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntryStorage: Send + Sync + 'static {
    /// Returns every stored entry. An absent file is an empty snapshot.
    async fn read(&self) -> Result<Vec<TimeEntry>, StorageError>;

    /// Overwrites the stored snapshot. Callers are expected to include the running entry.
    async fn write(&self, entries: &[TimeEntry]) -> Result<(), StorageError>;
}

/// The main realization of [EntryStorage], a single json array in the shared folder.
pub struct EntryStorageImpl {
    folder: Option<SharedFolder>,
}

impl EntryStorageImpl {
    pub fn new(folder: Option<SharedFolder>) -> Self {
        Self { folder }
    }
}

#[async_trait]
impl EntryStorage for EntryStorageImpl {
    #[instrument(level = "debug", skip(self))]
    async fn read(&self) -> Result<Vec<TimeEntry>, StorageError> {
        let Some(folder) = &self.folder else {
            debug!("No shared folder, reading an empty snapshot");
            return Ok(vec![]);
        };
        let entries = read_json_file::<Vec<TimeEntry>>(&folder.entries_path()).await?;
        Ok(entries.unwrap_or_default())
    }

    #[instrument(level = "debug", skip_all, fields(count = entries.len()))]
    async fn write(&self, entries: &[TimeEntry]) -> Result<(), StorageError> {
        let folder = self
            .folder
            .as_ref()
            .ok_or(StorageError::ConfigurationMissing)?;
        folder.ensure_layout().await?;

        let path = folder.entries_path();
        let buffer = to_json_bytes(&path, &entries)?;
        replace_file(&path, &buffer)
            .await
            .map_err(|e| StorageError::io(&path, e))?;

        info!("Stored {} entries", entries.len());
        Ok(())
    }
}
