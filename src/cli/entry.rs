use std::fmt::Display;

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use chrono_english::parse_date_string;
use clap::{CommandFactory, Parser, ValueEnum};

use crate::storage::entities::TimeEntry;

use super::Args;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DateStyle {
    Uk,
    Us,
}

impl From<DateStyle> for chrono_english::Dialect {
    fn from(value: DateStyle) -> Self {
        match value {
            DateStyle::Uk => Self::Uk,
            DateStyle::Us => Self::Us,
        }
    }
}

impl Display for DateStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateStyle::Uk => write!(f, "uk"),
            DateStyle::Us => write!(f, "us"),
        }
    }
}

#[derive(Debug, Parser)]
pub struct AddCommand {
    description: Vec<String>,
    #[arg(
        long = "start",
        short,
        help = "Start of the entry. Examples are \"9am\", \"1 hour ago\", \"12:00 16/03/2025\""
    )]
    start_date: String,
    #[arg(
        long = "end",
        short,
        help = "End of the entry. Defaults to now. Same formats as --start"
    )]
    end_date: Option<String>,
    #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
    date_style: DateStyle,
    #[arg(short, long)]
    project: Option<String>,
    #[arg(short, long = "tag")]
    tags: Vec<String>,
}

/// Builds a completed entry out of `add` arguments.
pub fn process_add_command(
    AddCommand {
        description,
        start_date,
        end_date,
        date_style,
        project,
        tags,
    }: AddCommand,
) -> Result<TimeEntry> {
    let now = Local::now();
    let start = parse_moment("start", &start_date, now, date_style)?;
    let end = match end_date {
        Some(end_date) => parse_moment("end", &end_date, now, date_style)?,
        None => now.with_timezone(&Utc),
    };

    if end < start {
        return Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                format!("Entry can't end ({end}) before it starts ({start})"),
            )
            .into());
    }

    Ok(TimeEntry::start(start, description.join(" "))
        .with_project(project)
        .with_tags(tags)
        .stopped_at(end))
}

fn parse_moment(
    name: &str,
    value: &str,
    now: DateTime<Local>,
    date_style: DateStyle,
) -> Result<DateTime<Utc>> {
    match parse_date_string(value, now, date_style.into()) {
        Ok(v) => Ok(v.with_timezone(&Utc)),
        Err(e) => Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                format!("Failed to validate {name} date {e}"),
            )
            .into()),
    }
}
