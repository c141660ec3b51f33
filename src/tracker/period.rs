use chrono::{DateTime, Datelike, Days, Months, NaiveDate, TimeZone, Utc};

use crate::{
    storage::{
        archive::PeriodArchiveKey,
        config::{PeriodKind, Settings},
        entities::TimeEntry,
    },
    utils::time::local_instant,
};

const BIWEEKLY_DAYS: i64 = 14;

/// Billing period made of whole calendar days, both bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    /// Returns the configured period `date` belongs to.
    pub fn containing(date: NaiveDate, settings: &Settings) -> Self {
        match settings.period {
            PeriodKind::Weekly => {
                let back = (7 + date.weekday().num_days_from_monday()
                    - settings.week_start.num_days_from_monday())
                    % 7;
                let start = date - Days::new(back.into());
                Self {
                    start,
                    end: start + Days::new(6),
                }
            }
            PeriodKind::Biweekly => {
                let offset = (date - settings.biweekly_anchor)
                    .num_days()
                    .rem_euclid(BIWEEKLY_DAYS);
                // rem_euclid keeps the offset within 0..14
                let start = date - Days::new(offset as u64);
                Self {
                    start,
                    end: start + Days::new(BIWEEKLY_DAYS as u64 - 1),
                }
            }
            PeriodKind::Monthly => {
                let start = date - Days::new(date.day0().into());
                let end = start
                    .checked_add_months(Months::new(1))
                    .map(|v| v - Days::new(1))
                    .unwrap_or(NaiveDate::MAX);
                Self { start, end }
            }
        }
    }

    /// Period that ends the day before this one starts.
    pub fn previous(&self, settings: &Settings) -> Self {
        Self::containing(self.start - Days::new(1), settings)
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn archive_key(&self) -> PeriodArchiveKey {
        PeriodArchiveKey::new(self.start, self.end)
    }

    /// The last reminder weekday/time inside the period, in the configured timezone.
    pub fn due_instant(&self, settings: &Settings) -> Option<DateTime<Utc>> {
        self.start
            .iter_days()
            .take_while(|day| *day <= self.end)
            .filter(|day| day.weekday() == settings.reminder_weekday)
            .last()
            .map(|day| local_instant(day, settings.reminder_time, &settings.utc_offset))
    }

    pub fn is_due(&self, settings: &Settings, now: DateTime<Utc>) -> bool {
        self.due_instant(settings).is_some_and(|due| now >= due)
    }

    /// Entries that started within the period, oldest first.
    pub fn entries_within<Tz: TimeZone>(&self, entries: &[TimeEntry], tz: &Tz) -> Vec<TimeEntry> {
        let mut within = entries
            .iter()
            .filter(|entry| self.contains_date(entry.start_time.with_timezone(tz).date_naive()))
            .cloned()
            .collect::<Vec<_>>();
        within.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        within
    }
}
