//! The tracker keeps an in-memory view of the shared entries and applies user actions to it.
//! The view is only a cache: it's rebuilt from the entry store on every load, resume and
//! detected remote change, and every local change is written back as a whole snapshot.

use std::{path::PathBuf, sync::Arc};

use backup::DueBackupScheduler;
use chrono::{DateTime, Utc};
use poller::{ChangePoller, PollerHandle};
use reconcile::{reconcile, Reconciled};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument};

use crate::{
    storage::{
        archive::{ArchiveStorage, PeriodArchiveKey},
        config::Settings,
        entities::{EntryId, TimeEntry, Timesheet},
        entry_storage::EntryStorage,
    },
    utils::clock::Clock,
};

use self::{error::TrackerError, period::Period};

pub mod backup;
pub mod error;
pub mod period;
pub mod poller;
pub mod reconcile;
pub mod shutdown;

/// Details of a timer to start.
#[derive(Debug, Clone, Default)]
pub struct NewTimer {
    pub description: String,
    pub project_name: Option<String>,
    pub tags: Vec<String>,
}

/// Tracking session of one device.
pub struct Tracker<S: EntryStorage> {
    storage: Arc<S>,
    archive: Arc<ArchiveStorage>,
    settings: Settings,
    clock: Arc<dyn Clock>,
    state: Arc<watch::Sender<Reconciled>>,
    /// Serializes state replacements, counting local ones so polls can drop stale reads.
    revision: Arc<Mutex<u64>>,
    backups: DueBackupScheduler<S>,
    poller: Option<PollerHandle>,
}

impl<S: EntryStorage> Tracker<S> {
    pub fn new(
        storage: S,
        archive: ArchiveStorage,
        settings: Settings,
        clock: impl Clock,
    ) -> Self {
        let storage = Arc::new(storage);
        let archive = Arc::new(archive);
        let clock: Arc<dyn Clock> = Arc::new(clock);
        let backups = DueBackupScheduler::new(storage.clone(), archive.clone(), clock.clone());
        Self {
            storage,
            archive,
            settings,
            clock,
            state: Arc::new(watch::Sender::new(Reconciled::default())),
            revision: Arc::new(Mutex::new(0)),
            backups,
            poller: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Current view. Use [Tracker::subscribe] to get notified about changes.
    pub fn state(&self) -> Reconciled {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Reconciled> {
        self.state.subscribe()
    }

    /// Rebuilds the view from the entry store and runs due backups. Used on start, on resume
    /// and whenever data should be refreshed.
    #[instrument(level = "debug", skip(self))]
    pub async fn reload(&self) -> Result<Reconciled, TrackerError> {
        let reconciled = {
            let mut revision = self.revision.lock().await;
            let reconciled = reconcile(self.storage.read().await?);
            self.state.send_replace(reconciled.clone());
            *revision += 1;
            reconciled
        };
        debug!("Loaded {} entries", reconciled.len());
        self.run_due_backups().await;
        Ok(reconciled)
    }

    /// Archives due periods. Never fails, see [DueBackupScheduler].
    pub async fn run_due_backups(&self) -> Vec<PeriodArchiveKey> {
        self.backups.run(&self.settings).await
    }

    /// Applies `change` to the known state and persists the outcome. The view is only updated
    /// once the write succeeded.
    async fn mutate<T>(
        &self,
        change: impl FnOnce(Reconciled, DateTime<Utc>) -> Result<(Vec<TimeEntry>, T), TrackerError>,
    ) -> Result<T, TrackerError> {
        let mut revision = self.revision.lock().await;
        let known = self.state.borrow().clone();
        let (entries, value) = change(known, self.clock.time())?;

        let next = reconcile(entries);
        self.storage.write(&next.to_snapshot()).await?;
        self.state.send_replace(next);
        *revision += 1;
        Ok(value)
    }

    /// Starts a new timer. A running timer is stopped at the same moment.
    #[instrument(level = "debug", skip(self))]
    pub async fn start_timer(&self, timer: NewTimer) -> Result<TimeEntry, TrackerError> {
        let entry = self
            .mutate(|known, now| {
                let mut entries = known.completed;
                if let Some(running) = known.current {
                    let end = now.max(running.start_time);
                    entries.push(running.stopped_at(end));
                }
                let entry = TimeEntry::start(now, timer.description)
                    .with_project(timer.project_name)
                    .with_tags(timer.tags);
                entries.push(entry.clone());
                Ok((entries, entry))
            })
            .await?;
        info!("Started timer {}", entry.id);
        Ok(entry)
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn stop_timer(&self) -> Result<TimeEntry, TrackerError> {
        let entry = self
            .mutate(|known, now| {
                let running = known.current.ok_or(TrackerError::NoTimerRunning)?;
                let end = now.max(running.start_time);
                let stopped = running.stopped_at(end);
                let mut entries = known.completed;
                entries.push(stopped.clone());
                Ok((entries, stopped))
            })
            .await?;
        info!("Stopped timer {}", entry.id);
        Ok(entry)
    }

    /// Inserts `entry` or replaces the entry with the same id.
    #[instrument(level = "debug", skip(self), fields(id = %entry.id))]
    pub async fn save_entry(&self, entry: TimeEntry) -> Result<(), TrackerError> {
        if entry.end_time.is_some_and(|end| end < entry.start_time) {
            return Err(TrackerError::InvalidEntry(entry.id));
        }
        self.mutate(|known, _| {
            let mut entries = known.to_snapshot();
            match entries.iter_mut().find(|v| v.id == entry.id) {
                Some(existing) => *existing = entry,
                None => entries.push(entry),
            }
            Ok((entries, ()))
        })
        .await
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn delete_entry(&self, id: &EntryId) -> Result<TimeEntry, TrackerError> {
        self.mutate(|known, _| {
            let mut entries = known.to_snapshot();
            let index = entries
                .iter()
                .position(|v| v.id == *id)
                .ok_or_else(|| TrackerError::EntryNotFound(id.clone()))?;
            let removed = entries.remove(index);
            Ok((entries, removed))
        })
        .await
    }

    /// Period that contains the current moment in the configured timezone.
    pub fn current_period(&self) -> Period {
        let today = self
            .clock
            .time()
            .with_timezone(&self.settings.utc_offset)
            .date_naive();
        Period::containing(today, &self.settings)
    }

    /// Draft timesheet of the current period built from the known state.
    pub fn current_timesheet(&self) -> Timesheet {
        let period = self.current_period();
        let entries = period.entries_within(&self.state().to_snapshot(), &self.settings.utc_offset);
        Timesheet::draft(period.start, period.end, entries)
    }

    /// Stores the current period as a submitted snapshot and returns its location. A running
    /// timer is recorded as stopped at the moment of sending.
    #[instrument(level = "debug", skip(self))]
    pub async fn send_timesheet(&self, notes: Option<String>) -> Result<PathBuf, TrackerError> {
        let now = self.clock.time();
        let timesheet = self
            .current_timesheet()
            .closed_at(now)
            .submitted(now)
            .with_notes(notes);
        Ok(self.archive.write_snapshot(&timesheet).await?)
    }

    pub async fn archived_timesheets(&self) -> Result<Vec<Timesheet>, TrackerError> {
        Ok(self.archive.list().await?)
    }

    /// Called when the application becomes active. Refreshes the view and starts polling.
    /// Polling starts even if the refresh failed, the next tick will retry.
    pub async fn on_foreground(&mut self) -> Result<Reconciled, TrackerError> {
        let reloaded = self.reload().await;
        if self.poller.is_none() {
            let poller = ChangePoller::new(
                self.storage.clone(),
                self.state.clone(),
                self.revision.clone(),
                self.clock.clone(),
                self.settings.poll_interval(),
            );
            self.poller = Some(poller.spawn());
            debug!("Poller started");
        }
        reloaded
    }

    /// Called when the application goes to the background. Stops polling for good.
    pub async fn on_background(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop().await;
            debug!("Poller stopped");
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(PollerHandle::is_running)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use anyhow::Result;
    use chrono::{FixedOffset, TimeZone, Utc};
    use tempfile::tempdir;

    use crate::{
        storage::{
            archive::ArchiveStorage,
            config::Settings,
            entities::{EntryId, TimeEntry, TimesheetStatus},
            entry_storage::{EntryStorage, EntryStorageImpl, MockEntryStorage},
            error::StorageError,
            folder::SharedFolder,
        },
        tracker::{error::TrackerError, reconcile::Reconciled},
        utils::{clock::TestClock, logging::TEST_LOGGING},
    };

    use super::{NewTimer, Tracker};

    fn settings() -> Settings {
        Settings {
            utc_offset: FixedOffset::east_opt(0).unwrap(),
            poll_interval_seconds: 1,
            ..Settings::default()
        }
    }

    fn device(folder: &SharedFolder, clock: TestClock) -> Tracker<EntryStorageImpl> {
        Tracker::new(
            EntryStorageImpl::new(Some(folder.clone())),
            ArchiveStorage::new(Some(folder.clone())),
            settings(),
            clock,
        )
    }

    fn timer(description: &str) -> NewTimer {
        NewTimer {
            description: description.into(),
            ..NewTimer::default()
        }
    }

    #[tokio::test]
    async fn test_start_and_stop() -> Result<()> {
        let dir = tempdir()?;
        let folder = SharedFolder::new(dir.path());
        let clock = TestClock::starting_at(Utc.with_ymd_and_hms(2026, 1, 7, 9, 0, 0).unwrap());
        let tracker = device(&folder, clock);

        let started = tracker.start_timer(timer("focus")).await?;
        assert_eq!(tracker.state().current, Some(started.clone()));

        let stopped = tracker.stop_timer().await?;
        assert_eq!(stopped.id, started.id);
        assert!(stopped.end_time.unwrap() >= stopped.start_time);

        let stored = EntryStorageImpl::new(Some(folder)).read().await?;
        assert_eq!(stored, vec![stopped]);
        assert!(matches!(
            tracker.stop_timer().await,
            Err(TrackerError::NoTimerRunning)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_start_closes_running_timer() -> Result<()> {
        let dir = tempdir()?;
        let folder = SharedFolder::new(dir.path());
        let clock = TestClock::starting_at(Utc.with_ymd_and_hms(2026, 1, 7, 9, 0, 0).unwrap());
        let tracker = device(&folder, clock);

        let first = tracker.start_timer(timer("first")).await?;
        let second = tracker.start_timer(timer("second")).await?;

        let state = tracker.state();
        assert_eq!(state.current.map(|v| v.id), Some(second.id));
        assert_eq!(state.completed.len(), 1);
        assert_eq!(state.completed[0].id, first.id);
        assert!(state.completed[0].end_time.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_write_keeps_state() -> Result<()> {
        let mut storage = MockEntryStorage::new();
        storage.expect_read().returning(|| Ok(vec![]));
        storage.expect_write().returning(|_| {
            Err(StorageError::io(
                "/shared",
                std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            ))
        });
        let tracker = Tracker::new(
            storage,
            ArchiveStorage::new(None),
            settings(),
            TestClock::starting_at(Utc.with_ymd_and_hms(2026, 1, 7, 9, 0, 0).unwrap()),
        );
        tracker.reload().await?;

        let result = tracker.start_timer(timer("lost")).await;
        assert!(matches!(result, Err(TrackerError::Storage(StorageError::Io { .. }))));
        assert_eq!(tracker.state(), Reconciled::default());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_tracker_stops_polling() -> Result<()> {
        let reads = Arc::new(AtomicUsize::new(0));
        let counter = reads.clone();
        let mut storage = MockEntryStorage::new();
        storage.expect_read().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        });
        let mut tracker = Tracker::new(
            storage,
            ArchiveStorage::new(None),
            settings(),
            TestClock::starting_at(Utc.with_ymd_and_hms(2026, 1, 7, 9, 0, 0).unwrap()),
        );
        tracker.on_foreground().await?;
        let after_load = reads.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let at_drop = reads.load(Ordering::SeqCst);
        assert!(at_drop > after_load);

        drop(tracker);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(reads.load(Ordering::SeqCst), at_drop);
        Ok(())
    }

    #[tokio::test]
    async fn test_save_and_delete() -> Result<()> {
        let dir = tempdir()?;
        let folder = SharedFolder::new(dir.path());
        let now = Utc.with_ymd_and_hms(2026, 1, 7, 9, 0, 0).unwrap();
        let tracker = device(&folder, TestClock::starting_at(now));

        let entry = TimeEntry::start(now - chrono::Duration::hours(2), "manual")
            .stopped_at(now - chrono::Duration::hours(1));
        tracker.save_entry(entry.clone()).await?;
        let edited = TimeEntry {
            description: "edited".into(),
            ..entry.clone()
        };
        tracker.save_entry(edited.clone()).await?;
        assert_eq!(tracker.state().completed, vec![edited.clone()]);

        let backwards = TimeEntry::start(now, "backwards").stopped_at(now - chrono::Duration::hours(1));
        assert!(matches!(
            tracker.save_entry(backwards).await,
            Err(TrackerError::InvalidEntry(_))
        ));

        assert_eq!(tracker.delete_entry(&entry.id).await?, edited);
        assert!(tracker.state().is_empty());
        assert!(matches!(
            tracker.delete_entry(&EntryId::from("missing")).await,
            Err(TrackerError::EntryNotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_timesheets() -> Result<()> {
        let dir = tempdir()?;
        let folder = SharedFolder::new(dir.path());
        let now = Utc.with_ymd_and_hms(2026, 1, 7, 9, 0, 0).unwrap();
        let tracker = device(&folder, TestClock::starting_at(now));

        let last_week = TimeEntry::start(now - chrono::Duration::days(7), "old")
            .stopped_at(now - chrono::Duration::days(7) + chrono::Duration::hours(1));
        tracker.save_entry(last_week).await?;
        let running = tracker.start_timer(timer("now")).await?;

        let sheet = tracker.current_timesheet();
        assert_eq!(sheet.period_start.to_string(), "2026-01-05");
        assert_eq!(sheet.period_end.to_string(), "2026-01-11");
        assert_eq!(sheet.entries, vec![running.clone()]);

        tracker.send_timesheet(Some("for review".into())).await?;
        let archived = tracker.archived_timesheets().await?;
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].status, TimesheetStatus::Submitted);
        assert_eq!(archived[0].notes.as_deref(), Some("for review"));
        assert_eq!(archived[0].entries[0].id, running.id);
        assert!(archived[0].entries[0].end_time.is_some());
        assert!(tracker.state().current.is_some());
        Ok(())
    }

    /// Two devices share a folder. Device B starts a later timer without closing A's, device A
    /// picks it up on its next poll.
    #[tokio::test]
    async fn test_devices_converge_through_polling() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let folder = SharedFolder::new(dir.path());
        let now = Utc.with_ymd_and_hms(2026, 1, 7, 9, 0, 0).unwrap();

        let mut device_a = device(&folder, TestClock::starting_at(now));
        let x = device_a.start_timer(timer("x on a")).await?;
        device_a.on_foreground().await?;
        assert!(device_a.is_polling());
        let mut changes = device_a.subscribe();
        changes.borrow_and_update();

        // B's write carries its own running timer next to the one it synced from A.
        let y = TimeEntry::start(now + chrono::Duration::minutes(10), "y on b");
        EntryStorageImpl::new(Some(folder.clone()))
            .write(&[x.clone(), y.clone()])
            .await?;

        tokio::time::timeout(Duration::from_secs(10), changes.changed()).await??;

        let state = device_a.state();
        assert_eq!(state.current, Some(y));
        assert_eq!(state.completed.len(), 1);
        assert_eq!(state.completed[0].id, x.id);
        assert_eq!(state.completed[0].end_time, Some(x.start_time));

        device_a.on_background().await;
        assert!(!device_a.is_polling());
        Ok(())
    }

    #[tokio::test]
    async fn test_remote_stop_is_picked_up() -> Result<()> {
        let dir = tempdir()?;
        let folder = SharedFolder::new(dir.path());
        let now = Utc.with_ymd_and_hms(2026, 1, 7, 9, 0, 0).unwrap();

        let mut device_a = device(&folder, TestClock::starting_at(now));
        let device_b = device(&folder, TestClock::starting_at(now));
        device_a.start_timer(timer("shared")).await?;
        device_a.on_foreground().await?;
        let mut changes = device_a.subscribe();
        changes.borrow_and_update();

        device_b.reload().await?;
        let stopped = device_b.stop_timer().await?;

        tokio::time::timeout(Duration::from_secs(10), changes.changed()).await??;
        assert_eq!(device_a.state().current, None);
        assert_eq!(device_a.state().completed, vec![stopped]);

        device_a.on_background().await;
        Ok(())
    }
}
