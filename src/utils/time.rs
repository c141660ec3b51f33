use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

/// This is the standard way of converting a date into a part of an archive name in driftclock.
pub fn date_to_key_part(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Converts a wall clock time in `tz` into an instant.
pub fn local_instant<Tz: TimeZone>(date: NaiveDate, time: NaiveTime, tz: &Tz) -> DateTime<Utc> {
    let naive = date.and_time(time);
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|v| v.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

pub fn format_duration(v: Duration) -> String {
    if v.num_hours() > 0 {
        format!("{}h{}m", v.num_hours(), v.num_minutes() % 60)
    } else if v.num_minutes() > 0 {
        format!("{}m{}s", v.num_minutes() % 60, v.num_seconds() % 60)
    } else {
        format!("{}s", v.num_seconds() % 60)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

    use super::{format_duration, local_instant};

    #[test]
    fn test_local_instant() {
        let tz = FixedOffset::east_opt(3600).unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 1, 9).unwrap();
        assert_eq!(
            local_instant(date, NaiveTime::from_hms_opt(17, 0, 0).unwrap(), &tz),
            Utc.with_ymd_and_hms(2026, 1, 9, 16, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::seconds(42)), "42s");
        assert_eq!(format_duration(Duration::seconds(125)), "2m5s");
        assert_eq!(format_duration(Duration::minutes(135)), "2h15m");
    }
}
