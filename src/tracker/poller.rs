use std::{fmt::Display, sync::Arc, time::Duration};

use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, Instrument};

use crate::{
    storage::{entities::TimeEntry, entry_storage::EntryStorage, error::StorageError},
    utils::clock::Clock,
};

use super::reconcile::{reconcile, Reconciled};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Why the in-memory state was replaced by a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeReason {
    /// The tracked running entry was stopped on another device.
    CurrentClosed,
    /// Another running entry took over, or the tracked one disappeared.
    CurrentReplaced,
    CompletedCountChanged,
}

impl Display for ChangeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeReason::CurrentClosed => write!(f, "running entry closed elsewhere"),
            ChangeReason::CurrentReplaced => write!(f, "running entry replaced"),
            ChangeReason::CompletedCountChanged => write!(f, "completed entries changed"),
        }
    }
}

/// Compares a freshly read snapshot with the known state. `fresh_state` must be the
/// reconciliation of `fresh`.
pub fn detect_change(
    known: &Reconciled,
    fresh: &[TimeEntry],
    fresh_state: &Reconciled,
) -> Option<ChangeReason> {
    if let Some(current) = &known.current {
        let closed = fresh
            .iter()
            .any(|entry| entry.id == current.id && entry.end_time.is_some());
        if closed {
            return Some(ChangeReason::CurrentClosed);
        }
    }

    let known_current = known.current.as_ref().map(|v| &v.id);
    let fresh_current = fresh_state.current.as_ref().map(|v| &v.id);
    if known_current != fresh_current {
        return Some(ChangeReason::CurrentReplaced);
    }

    if known.completed.len() != fresh_state.completed.len() {
        return Some(ChangeReason::CompletedCountChanged);
    }
    None
}

/// Periodically re-reads the entry store to pick up writes of other devices. It only ever
/// replaces the in-memory state, writing is left to explicit user actions.
pub struct ChangePoller<S: EntryStorage> {
    storage: Arc<S>,
    state: Arc<watch::Sender<Reconciled>>,
    /// Serializes state replacements. Holds a revision bumped by every local replacement.
    revision: Arc<Mutex<u64>>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl<S: EntryStorage> ChangePoller<S> {
    pub fn new(
        storage: Arc<S>,
        state: Arc<watch::Sender<Reconciled>>,
        revision: Arc<Mutex<u64>>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            storage,
            state,
            revision,
            clock,
            interval,
            shutdown: CancellationToken::new(),
        }
    }

    /// Reads the store once and replaces the state if one of the change signals fires.
    ///
    /// The read happens without holding the lock so a slow folder doesn't hold back user
    /// actions. A read that overlapped a local change is dropped, the next tick sees the
    /// written file.
    pub async fn poll_once(&self) -> Result<Option<ChangeReason>, StorageError> {
        let seen = *self.revision.lock().await;
        let fresh = self.storage.read().await?;
        let fresh_state = reconcile(fresh.clone());

        let revision = self.revision.lock().await;
        if *revision != seen {
            debug!("State changed locally while reading, skipping");
            return Ok(None);
        }
        let reason = detect_change(&self.state.borrow(), &fresh, &fresh_state);
        if reason.is_some() {
            self.state.send_replace(fresh_state);
        }
        Ok(reason)
    }

    /// Executes the polling loop until the shutdown token is cancelled.
    pub async fn run(self) {
        let mut poll_point = self.clock.instant();
        loop {
            poll_point += self.interval;

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    return
                }
                _ = self.clock.sleep_until(poll_point) => ()
            }

            let span = info_span!("Polling entry store");
            let polled = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return,
                polled = self.poll_once().instrument(span) => polled,
            };
            match polled {
                Ok(Some(reason)) => info!("Reloaded entries: {reason}"),
                Ok(None) => trace!("No changes"),
                // Sync providers routinely hold files mid-download, next tick will do.
                Err(e) => debug!("Polling failed {e}"),
            }
        }
    }

    /// Starts the loop on the runtime and returns a handle that stops it.
    pub fn spawn(self) -> PollerHandle {
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(self.run());
        PollerHandle { shutdown, task }
    }
}

/// Running [ChangePoller]. [PollerHandle::stop] cancels the loop and waits for it, dropping
/// the handle only cancels it.
pub struct PollerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Cancels the loop and waits for it to finish. No poll runs after this returns.
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Err(e) = (&mut self.task).await {
            error!("Poller task ended abnormally {e:?}");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
