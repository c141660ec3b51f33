use chrono::{DateTime, Duration, Local, Utc};
use now::DateTimeNow;

use crate::{
    storage::{
        config::Settings,
        entities::{TimeEntry, Timesheet},
    },
    tracker::reconcile::Reconciled,
    utils::time::format_duration,
};

const TIME_FORMAT: &str = "%x %H:%M";

fn describe(entry: &TimeEntry) -> String {
    let mut text = entry.description.clone();
    if let Some(project) = &entry.project_name {
        text = format!("[{project}] {text}");
    }
    if !entry.tags.is_empty() {
        let tags = entry
            .tags
            .iter()
            .map(|v| format!("#{v}"))
            .collect::<Vec<_>>()
            .join(" ");
        text = format!("{text} {tags}");
    }
    text
}

pub fn print_entry(entry: &TimeEntry, now: DateTime<Utc>) {
    let start = entry.start_time.with_timezone(&Local);
    let end = entry
        .end_time
        .map(|v| v.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "now".into());
    println!(
        "{}\t{}-{}\t{}\t{}",
        entry.id,
        start.format(TIME_FORMAT),
        end,
        format_duration(entry.duration(now)),
        describe(entry)
    );
}

fn tracked_today(state: &Reconciled, now: DateTime<Utc>) -> Duration {
    let day_start = now.with_timezone(&Local).beginning_of_day().with_timezone(&Utc);
    state
        .to_snapshot()
        .iter()
        .filter(|entry| entry.start_time >= day_start)
        .map(|entry| entry.duration(now))
        .fold(Duration::zero(), |sum, v| sum + v)
}

pub fn print_status(state: &Reconciled, settings: &Settings, now: DateTime<Utc>) {
    match &state.current {
        Some(current) => println!(
            "Running for {}: {}",
            format_duration(current.duration(now)),
            describe(current)
        ),
        None => println!("No timer running"),
    }
    println!("Today\t{}", format_duration(tracked_today(state, now)));
    if let Some(name) = &settings.user_name {
        println!("User\t{name}");
    }
}

pub fn print_log(completed: &[TimeEntry], limit: usize, today: bool, now: DateTime<Utc>) {
    let day_start = now.with_timezone(&Local).beginning_of_day().with_timezone(&Utc);
    completed
        .iter()
        .filter(|entry| !today || entry.start_time >= day_start)
        .take(limit)
        .for_each(|entry| print_entry(entry, now));
}

pub fn print_timesheet(timesheet: &Timesheet, now: DateTime<Utc>) {
    println!(
        "{} .. {}\t{}\t{}",
        timesheet.period_start,
        timesheet.period_end,
        timesheet.status,
        format_duration(timesheet.total_duration(now))
    );
    for (project, total) in timesheet.project_totals(now) {
        println!(
            "  {}\t{}",
            project.as_deref().unwrap_or("(no project)"),
            format_duration(total)
        );
    }
    println!();
    for entry in &timesheet.entries {
        print_entry(entry, now);
    }
}

pub fn print_archive(timesheets: &[Timesheet], now: DateTime<Utc>) {
    if timesheets.is_empty() {
        println!("No archived timesheets");
    }
    for timesheet in timesheets {
        println!(
            "{} .. {}\t{}\t{}\t{} entries{}",
            timesheet.period_start,
            timesheet.period_end,
            timesheet.status,
            format_duration(timesheet.total_duration(now)),
            timesheet.entries.len(),
            timesheet
                .notes
                .as_ref()
                .map(|v| format!("\t{v}"))
                .unwrap_or_default()
        );
    }
}
