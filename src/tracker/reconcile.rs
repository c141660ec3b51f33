use std::cmp::Ordering;

use tracing::{debug, warn};

use crate::storage::entities::TimeEntry;

/// Authoritative view of a snapshot: at most one running entry plus everything else as
/// completed entries, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reconciled {
    pub current: Option<TimeEntry>,
    pub completed: Vec<TimeEntry>,
}

impl Reconciled {
    /// Snapshot to persist. The running entry goes first, the store itself has no notion of it.
    pub fn to_snapshot(&self) -> Vec<TimeEntry> {
        self.current
            .iter()
            .chain(self.completed.iter())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.completed.len() + usize::from(self.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Newer start wins, equal starts are decided by id so the result never depends on the order
/// entries were stored in.
fn recency(a: &TimeEntry, b: &TimeEntry) -> Ordering {
    a.start_time
        .cmp(&b.start_time)
        .then_with(|| a.id.cmp(&b.id))
}

/// Turns an arbitrary snapshot into a [Reconciled] state.
///
/// Devices never lock the shared file, so a snapshot may contain several running entries, for
/// example when two devices started a timer without seeing each other's write, or when a crash
/// left one behind. The entry with the latest start stays running. Every other running entry is
/// closed at its own start, it is kept but adds nothing to any total.
///
/// The function is pure and idempotent: reconciling `to_snapshot()` of a result yields the same
/// result.
pub fn reconcile(entries: Vec<TimeEntry>) -> Reconciled {
    let (mut in_progress, mut completed): (Vec<_>, Vec<_>) =
        entries.into_iter().partition(TimeEntry::is_in_progress);

    in_progress.sort_by(|a, b| recency(b, a));
    let mut in_progress = in_progress.into_iter();
    let current = in_progress.next();

    for stale in in_progress {
        warn!(
            "Closing stale running entry {} started at {}",
            stale.id, stale.start_time
        );
        let start = stale.start_time;
        completed.push(stale.stopped_at(start));
    }

    completed.sort_by(|a, b| recency(b, a));

    if let Some(current) = &current {
        debug!("Running entry is {}", current.id);
    }

    Reconciled { current, completed }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use crate::storage::entities::{EntryId, TimeEntry};

    use super::{reconcile, Reconciled};

    fn t() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 7, 12, 0, 0).unwrap()
    }

    fn running(id: &str, start: DateTime<Utc>) -> TimeEntry {
        TimeEntry {
            id: id.into(),
            ..TimeEntry::start(start, id)
        }
    }

    fn done(id: &str, start: DateTime<Utc>, minutes: i64) -> TimeEntry {
        running(id, start).stopped_at(start + Duration::minutes(minutes))
    }

    #[test]
    fn test_empty_snapshot() {
        assert_eq!(reconcile(vec![]), Reconciled::default());
    }

    #[test]
    fn test_single_running_entry() {
        let result = reconcile(vec![running("a", t())]);
        assert_eq!(result.current.as_ref().map(|v| v.start_time), Some(t()));
        assert!(result.completed.is_empty());
    }

    #[test]
    fn test_no_running_entries_is_identity_split() {
        let entries = vec![
            done("old", t() - Duration::days(1), 30),
            done("new", t(), 15),
        ];
        let result = reconcile(entries.clone());
        assert_eq!(result.current, None);
        assert_eq!(result.completed, vec![entries[1].clone(), entries[0].clone()]);
    }

    #[test]
    fn test_latest_start_wins() {
        let result = reconcile(vec![
            running("1", t() - Duration::seconds(3600)),
            running("2", t() - Duration::seconds(60)),
        ]);

        assert_eq!(result.current.as_ref().map(|v| v.id.clone()), Some("2".into()));
        assert_eq!(result.completed.len(), 1);
        assert_eq!(result.completed[0].id, EntryId::from("1"));
        assert_eq!(result.completed[0].duration(t()), Duration::zero());
    }

    #[test]
    fn test_many_running_entries_preserve_count() {
        let entries = vec![
            running("a", t() - Duration::hours(5)),
            done("b", t() - Duration::hours(4), 20),
            running("c", t() - Duration::hours(1)),
            running("d", t() - Duration::hours(3)),
            done("e", t() - Duration::hours(2), 10),
        ];
        let result = reconcile(entries);

        assert_eq!(result.len(), 5);
        assert_eq!(result.current.unwrap().id, EntryId::from("c"));
        for stale in ["a", "d"] {
            let entry = result
                .completed
                .iter()
                .find(|v| v.id == EntryId::from(stale))
                .unwrap();
            assert_eq!(entry.end_time, Some(entry.start_time));
        }
        let starts = result
            .completed
            .iter()
            .map(|v| v.start_time)
            .collect::<Vec<_>>();
        let mut sorted = starts.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(starts, sorted);
    }

    #[test]
    fn test_equal_starts_are_order_independent() {
        let forward = reconcile(vec![running("x", t()), running("y", t())]);
        let backward = reconcile(vec![running("y", t()), running("x", t())]);

        assert_eq!(forward, backward);
        assert_eq!(forward.current.unwrap().id, EntryId::from("y"));
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let first = reconcile(vec![
            running("1", t() - Duration::hours(1)),
            done("2", t() - Duration::hours(2), 30),
            running("3", t()),
            running("4", t()),
        ]);
        let second = reconcile(first.to_snapshot());
        assert_eq!(first, second);
    }

    #[test]
    fn test_malformed_entry_passes_through() {
        let broken = running("broken", t()).stopped_at(t() - Duration::hours(1));
        let result = reconcile(vec![broken.clone()]);

        assert_eq!(result.completed, vec![broken]);
        assert_eq!(result.completed[0].duration(t()), Duration::zero());
    }
}
