use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    storage::{
        archive::{ArchiveStorage, PeriodArchiveKey},
        config::Settings,
        entities::Timesheet,
        entry_storage::EntryStorage,
        error::StorageError,
    },
    utils::clock::Clock,
};

use super::{period::Period, reconcile::reconcile};

const BACKUP_NOTE: &str = "Automatic backup";

/// Archives the current and the previous period once their reminder deadline has passed.
///
/// There is no persistent schedule, [DueBackupScheduler::run] is called whenever the tracker
/// loads or reloads data. The existence of the period's archive file is the only guard, every
/// device computes the same file name for the same period, so the first writer wins.
pub struct DueBackupScheduler<S: EntryStorage> {
    storage: Arc<S>,
    archive: Arc<ArchiveStorage>,
    clock: Arc<dyn Clock>,
}

impl<S: EntryStorage> DueBackupScheduler<S> {
    pub fn new(storage: Arc<S>, archive: Arc<ArchiveStorage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            archive,
            clock,
        }
    }

    /// Writes every due and missing archive. Failures are logged, never returned. Returns keys
    /// of archives created by this call.
    pub async fn run(&self, settings: &Settings) -> Vec<PeriodArchiveKey> {
        match self.run_inner(settings).await {
            Ok(written) => written,
            Err(e) => {
                warn!("Due backup failed, will retry on next load: {e}");
                vec![]
            }
        }
    }

    async fn run_inner(&self, settings: &Settings) -> Result<Vec<PeriodArchiveKey>, StorageError> {
        let now = self.clock.time();
        let today = now.with_timezone(&settings.utc_offset).date_naive();
        let current = Period::containing(today, settings);

        let mut pending = vec![];
        for period in [current.previous(settings), current] {
            if !period.is_due(settings, now) {
                continue;
            }
            let key = period.archive_key();
            if self.archive.exists(&key).await? {
                debug!("Backup {key} is already present");
                continue;
            }
            pending.push((period, key));
        }

        if pending.is_empty() {
            return Ok(vec![]);
        }

        let snapshot = reconcile(self.storage.read().await?).to_snapshot();
        let mut written = vec![];
        for (period, key) in pending {
            let entries = period.entries_within(&snapshot, &settings.utc_offset);
            let timesheet = Timesheet::draft(period.start, period.end, entries)
                .closed_at(now)
                .with_notes(Some(BACKUP_NOTE.into()));
            if self.archive.write_once(&key, &timesheet).await? {
                info!(
                    "Backed up {} entries of {}..{}",
                    timesheet.entries.len(),
                    period.start,
                    period.end
                );
                written.push(key);
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
    use tempfile::tempdir;

    use crate::{
        storage::{
            archive::{ArchiveStorage, PeriodArchiveKey},
            config::Settings,
            entities::TimeEntry,
            entry_storage::{EntryStorage, EntryStorageImpl, MockEntryStorage},
            error::StorageError,
            folder::SharedFolder,
        },
        utils::clock::TestClock,
    };

    use super::DueBackupScheduler;

    fn settings() -> Settings {
        Settings {
            utc_offset: FixedOffset::east_opt(0).unwrap(),
            ..Settings::default()
        }
    }

    fn key(start: (i32, u32, u32), end: (i32, u32, u32)) -> PeriodArchiveKey {
        PeriodArchiveKey::new(
            NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap(),
            NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap(),
        )
    }

    fn scheduler_at(
        folder: &SharedFolder,
        now: DateTime<Utc>,
    ) -> DueBackupScheduler<EntryStorageImpl> {
        DueBackupScheduler::new(
            Arc::new(EntryStorageImpl::new(Some(folder.clone()))),
            Arc::new(ArchiveStorage::new(Some(folder.clone()))),
            Arc::new(TestClock::starting_at(now)),
        )
    }

    #[tokio::test]
    async fn test_backup_written_once_per_period() -> Result<()> {
        let dir = tempdir()?;
        let folder = SharedFolder::new(dir.path());
        let due = Utc.with_ymd_and_hms(2026, 1, 9, 17, 0, 0).unwrap();
        let entries = vec![
            TimeEntry::start(due - Duration::hours(8), "this week")
                .stopped_at(due - Duration::hours(6)),
            TimeEntry::start(due - Duration::days(7), "last week")
                .stopped_at(due - Duration::days(7) + Duration::hours(1)),
        ];
        EntryStorageImpl::new(Some(folder.clone()))
            .write(&entries)
            .await?;

        let before = scheduler_at(&folder, due - Duration::minutes(1))
            .run(&settings())
            .await;
        assert_eq!(before, vec![key((2025, 12, 29), (2026, 1, 4))]);

        let at = scheduler_at(&folder, due).run(&settings()).await;
        assert_eq!(at, vec![key((2026, 1, 5), (2026, 1, 11))]);

        for hours in [1, 3, 6] {
            let later = scheduler_at(&folder, due + Duration::hours(hours))
                .run(&settings())
                .await;
            assert!(later.is_empty());
        }

        let archive = ArchiveStorage::new(Some(folder.clone()));
        let stored = archive.list().await?;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].entries, vec![entries[0].clone()]);
        assert_eq!(stored[1].entries, vec![entries[1].clone()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_existing_archive_from_other_device_is_respected() -> Result<()> {
        let dir = tempdir()?;
        let folder = SharedFolder::new(dir.path());
        let due = Utc.with_ymd_and_hms(2026, 1, 9, 17, 0, 0).unwrap();
        folder.ensure_layout().await?;
        for name in ["period-20251229_20260104.json", "period-20260105_20260111.json"] {
            std::fs::write(folder.timesheets_dir().join(name), "{}")?;
        }

        let written = scheduler_at(&folder, due).run(&settings()).await;

        assert!(written.is_empty());
        assert_eq!(
            std::fs::read_to_string(
                folder.timesheets_dir().join("period-20260105_20260111.json")
            )?,
            "{}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_storage_failure_is_not_raised() -> Result<()> {
        let dir = tempdir()?;
        let folder = SharedFolder::new(dir.path());
        let mut storage = MockEntryStorage::new();
        storage
            .expect_read()
            .returning(|| Err(StorageError::ConfigurationMissing));
        let scheduler = DueBackupScheduler::new(
            Arc::new(storage),
            Arc::new(ArchiveStorage::new(Some(folder.clone()))),
            Arc::new(TestClock::starting_at(
                Utc.with_ymd_and_hms(2026, 1, 9, 17, 0, 0).unwrap(),
            )),
        );

        assert!(scheduler.run(&settings()).await.is_empty());
        assert!(ArchiveStorage::new(Some(folder)).list().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_entries_not_read_when_archives_exist() -> Result<()> {
        let dir = tempdir()?;
        let folder = SharedFolder::new(dir.path());
        folder.ensure_layout().await?;
        for name in ["period-20251229_20260104.json", "period-20260105_20260111.json"] {
            std::fs::write(folder.timesheets_dir().join(name), "{}")?;
        }
        let mut storage = MockEntryStorage::new();
        storage.expect_read().never();
        let scheduler = DueBackupScheduler::new(
            Arc::new(storage),
            Arc::new(ArchiveStorage::new(Some(folder))),
            Arc::new(TestClock::starting_at(
                Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap(),
            )),
        );

        assert!(scheduler.run(&settings()).await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_running_entry_is_archived_stopped() -> Result<()> {
        let dir = tempdir()?;
        let folder = SharedFolder::new(dir.path());
        let due = Utc.with_ymd_and_hms(2026, 1, 9, 17, 0, 0).unwrap();
        let running = TimeEntry::start(due - Duration::hours(8), "still going");
        EntryStorageImpl::new(Some(folder.clone()))
            .write(&[running.clone()])
            .await?;

        scheduler_at(&folder, due).run(&settings()).await;

        let stored = ArchiveStorage::new(Some(folder.clone())).list().await?;
        let current = stored
            .iter()
            .find(|v| v.period_start.to_string() == "2026-01-05")
            .expect("current period archived");
        assert_eq!(current.entries.len(), 1);
        assert_eq!(current.entries[0].id, running.id);
        assert!(current.entries[0].end_time.is_some_and(|end| end >= due));
        let at_backup = current.total_duration(due + Duration::minutes(1));
        let week_later = current.total_duration(due + Duration::days(7));
        assert_eq!(at_backup, week_later);
        assert!(at_backup >= Duration::hours(8));
        Ok(())
    }
}
