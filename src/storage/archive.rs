use std::{
    fmt::Display,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use futures::{stream, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::{
    fs::operations::{create_new_file, read_json_file, replace_file, to_json_bytes},
    utils::time::date_to_key_part,
};

use super::{entities::Timesheet, error::StorageError, folder::SharedFolder};

/// Name of the archive file of a period. Only calendar days take part in it, so every device
/// that agrees on the period bounds and timezone arrives at the same name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeriodArchiveKey(String);

impl PeriodArchiveKey {
    pub fn new(period_start: NaiveDate, period_end: NaiveDate) -> Self {
        Self(format!(
            "period-{}_{}",
            date_to_key_part(period_start),
            date_to_key_part(period_end)
        ))
    }

    /// Builds the key from instants, taking the calendar day each of them falls on in `tz`.
    pub fn from_instants<Tz: TimeZone>(
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        tz: &Tz,
    ) -> Self {
        Self::new(
            period_start.with_timezone(tz).date_naive(),
            period_end.with_timezone(tz).date_naive(),
        )
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.0)
    }
}

impl Display for PeriodArchiveKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage of timesheet snapshots in the `timesheets` directory of the shared folder.
pub struct ArchiveStorage {
    folder: Option<SharedFolder>,
}

impl ArchiveStorage {
    pub fn new(folder: Option<SharedFolder>) -> Self {
        Self { folder }
    }

    fn dir(&self) -> Result<PathBuf, StorageError> {
        self.folder
            .as_ref()
            .map(SharedFolder::timesheets_dir)
            .ok_or(StorageError::ConfigurationMissing)
    }

    async fn prepared_dir(&self) -> Result<PathBuf, StorageError> {
        let folder = self
            .folder
            .as_ref()
            .ok_or(StorageError::ConfigurationMissing)?;
        folder.ensure_layout().await?;
        Ok(folder.timesheets_dir())
    }

    pub async fn exists(&self, key: &PeriodArchiveKey) -> Result<bool, StorageError> {
        let path = self.dir()?.join(key.file_name());
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::io(&path, e))
    }

    /// Writes the period snapshot unless a file for `key` is already present. Returns whether
    /// this call created the file.
    #[instrument(level = "debug", skip(self, timesheet))]
    pub async fn write_once(
        &self,
        key: &PeriodArchiveKey,
        timesheet: &Timesheet,
    ) -> Result<bool, StorageError> {
        let path = self.prepared_dir().await?.join(key.file_name());
        let buffer = to_json_bytes(&path, timesheet)?;
        let created = create_new_file(&path, &buffer)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        if created {
            info!("Archived period {key}");
        } else {
            debug!("Archive {key} already exists");
        }
        Ok(created)
    }

    /// Stores a user triggered snapshot under a unique `<YYYY-MM>-<shortId>.json` name.
    #[instrument(level = "debug", skip_all, fields(id = %timesheet.id))]
    pub async fn write_snapshot(&self, timesheet: &Timesheet) -> Result<PathBuf, StorageError> {
        let short_id: String = timesheet
            .id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(8)
            .collect();
        let name = format!("{}-{short_id}.json", timesheet.period_start.format("%Y-%m"));
        let path = self.prepared_dir().await?.join(name);

        let buffer = to_json_bytes(&path, timesheet)?;
        replace_file(&path, &buffer)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        info!("Stored timesheet snapshot {path:?}");
        Ok(path)
    }

    /// Reads every archived timesheet, newest period first. Files that don't decode are skipped,
    /// sync providers tend to leave conflict copies and partial downloads around.
    pub async fn list(&self) -> Result<Vec<Timesheet>, StorageError> {
        let Some(folder) = &self.folder else {
            return Ok(vec![]);
        };
        let dir = folder.timesheets_dir();
        let paths = match json_files(&dir).await {
            Ok(paths) => paths,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(StorageError::io(&dir, e)),
        };

        let mut timesheets = stream::iter(paths)
            .map(|path| async move {
                let result = read_json_file::<Timesheet>(&path).await;
                (path, result)
            })
            .buffered(4)
            .filter_map(|(path, result)| async move {
                match result {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("Skipping unreadable timesheet {path:?}: {e}");
                        None
                    }
                }
            })
            .collect::<Vec<_>>()
            .await;

        timesheets.sort_by(|a, b| {
            b.period_start
                .cmp(&a.period_start)
                .then_with(|| b.submitted_at.cmp(&a.submitted_at))
        });
        Ok(timesheets)
    }
}

async fn json_files(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    let mut paths = vec![];
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        let is_json = path.extension().is_some_and(|v| v == "json");
        let hidden = path
            .file_name()
            .is_some_and(|v| v.to_string_lossy().starts_with('.'));
        if is_json && !hidden {
            paths.push(path);
        }
    }
    Ok(paths)
}
