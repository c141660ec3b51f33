use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::storage::error::StorageError;

/// Reads and decodes a json file. A missing file is not an error and yields `None`.
pub async fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{path:?} doesn't exist yet");
            return Ok(None);
        }
        Err(e) => return Err(StorageError::io(path, e)),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StorageError::decode(path, e))
}

/// Replaces `path` with `contents` as a whole. Data is written into a sibling temporary file
/// first and then renamed over the target, so readers either see the old file or the new one.
pub async fn replace_file(path: &Path, contents: &[u8]) -> Result<(), io::Error> {
    let temp = temporary_sibling(path);
    let result = async {
        let mut file = File::create(&temp).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp, path).await
    }
    .await;

    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(&temp).await {
            warn!("Failed to clean up temporary file {temp:?}: {e}");
        }
    }
    result
}

/// Creates `path` with `contents` only if it doesn't exist. Returns `false` if the file was
/// already there, in which case nothing is written.
pub async fn create_new_file(path: &Path, contents: &[u8]) -> Result<bool, io::Error> {
    let mut file = match File::options().write(true).create_new(true).open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    };

    let written = async {
        file.write_all(contents).await?;
        file.sync_all().await
    }
    .await;

    if let Err(e) = written {
        drop(file);
        // A truncated archive would block every later attempt for the same name.
        let _ = tokio::fs::remove_file(path).await;
        return Err(e);
    }
    Ok(true)
}

/// Serializes json in the human readable form used for every file in the shared folder.
pub fn to_json_bytes<T: Serialize>(path: &Path, value: &T) -> Result<Vec<u8>, StorageError> {
    let mut buffer =
        serde_json::to_vec_pretty(value).map_err(|e| StorageError::encode(path, e))?;
    buffer.push(b'\n');
    Ok(buffer)
}

fn temporary_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|v| v.to_string_lossy().to_string())
        .unwrap_or_default();
    let suffix = &Uuid::new_v4().simple().to_string()[..8];
    path.with_file_name(format!(".{name}.{suffix}.tmp"))
}
