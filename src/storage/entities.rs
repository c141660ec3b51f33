use std::{collections::BTreeSet, fmt::Display, sync::Arc};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of a [TimeEntry]. Ordering is only used as a deterministic tie-break.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize, Clone)]
#[serde(transparent)]
pub struct EntryId(Arc<str>);

impl EntryId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntryId {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for EntryId {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

impl Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single tracked interval. An entry without `end_time` is a running timer.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    pub id: EntryId,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl TimeEntry {
    /// Creates a running entry with a fresh id.
    pub fn start(start_time: DateTime<Utc>, description: impl Into<String>) -> Self {
        Self {
            id: EntryId::generate(),
            start_time,
            end_time: None,
            description: description.into(),
            project_name: None,
            tags: BTreeSet::new(),
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.end_time.is_none()
    }

    /// Elapsed time of the entry. Running entries are measured up to `now`. Entries with an
    /// end before their start count as zero.
    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        let end = self.end_time.unwrap_or(now);
        (end - self.start_time).max(Duration::zero())
    }

    /// Returns a completed copy of the entry ending at `end`.
    pub fn stopped_at(self, end: DateTime<Utc>) -> Self {
        Self {
            end_time: Some(end),
            ..self
        }
    }

    pub fn with_project(self, project_name: Option<String>) -> Self {
        Self {
            project_name,
            ..self
        }
    }

    pub fn with_tags(self, tags: impl IntoIterator<Item = String>) -> Self {
        Self {
            tags: tags.into_iter().collect(),
            ..self
        }
    }
}

#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimesheetStatus {
    #[default]
    Draft,
    Submitted,
    Approved,
    Rejected,
}

impl Display for TimesheetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimesheetStatus::Draft => write!(f, "draft"),
            TimesheetStatus::Submitted => write!(f, "submitted"),
            TimesheetStatus::Approved => write!(f, "approved"),
            TimesheetStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// Materialized view of the entries of one billing period. Never read back as tracking state.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Timesheet {
    pub id: String,
    pub period_start: NaiveDate,
    /// Inclusive.
    pub period_end: NaiveDate,
    pub entries: Vec<TimeEntry>,
    #[serde(default)]
    pub status: TimesheetStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Timesheet {
    pub fn draft(period_start: NaiveDate, period_end: NaiveDate, entries: Vec<TimeEntry>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            period_start,
            period_end,
            entries,
            status: TimesheetStatus::Draft,
            submitted_at: None,
            approved_at: None,
            notes: None,
        }
    }

    pub fn submitted(self, at: DateTime<Utc>) -> Self {
        Self {
            status: TimesheetStatus::Submitted,
            submitted_at: Some(at),
            ..self
        }
    }

    pub fn with_notes(self, notes: Option<String>) -> Self {
        Self { notes, ..self }
    }

    /// Stops entries still in progress at `at`, so the stored totals no longer depend on when
    /// the timesheet is read.
    pub fn closed_at(self, at: DateTime<Utc>) -> Self {
        let entries = self
            .entries
            .into_iter()
            .map(|entry| match entry.end_time {
                Some(_) => entry,
                None => {
                    let end = at.max(entry.start_time);
                    entry.stopped_at(end)
                }
            })
            .collect();
        Self { entries, ..self }
    }

    pub fn total_duration(&self, now: DateTime<Utc>) -> Duration {
        self.entries
            .iter()
            .map(|entry| entry.duration(now))
            .fold(Duration::zero(), |sum, v| sum + v)
    }

    /// Sums durations per project. Entries without a project are grouped under `None`.
    pub fn project_totals(&self, now: DateTime<Utc>) -> Vec<(Option<String>, Duration)> {
        let mut totals: Vec<(Option<String>, Duration)> = Vec::new();
        for entry in &self.entries {
            let duration = entry.duration(now);
            match totals
                .iter_mut()
                .find(|(project, _)| *project == entry.project_name)
            {
                Some((_, total)) => *total += duration,
                None => totals.push((entry.project_name.clone(), duration)),
            }
        }
        totals.sort_by(|a, b| b.1.cmp(&a.1));
        totals
    }
}
