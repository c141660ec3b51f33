use thiserror::Error;

use crate::storage::{entities::EntryId, error::StorageError};

/// Errors of explicit user actions. Passive work like polling never produces these.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("no timer is running")]
    NoTimerRunning,
    #[error("there is no entry with id {0}")]
    EntryNotFound(EntryId),
    #[error("entry {0} ends before it starts")]
    InvalidEntry(EntryId),
}
