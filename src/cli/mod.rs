pub mod entry;
pub mod output;
pub mod watch;

use std::{
    future::Future,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{FixedOffset, NaiveTime, Utc, Weekday};
use clap::{Parser, Subcommand};
use entry::{process_add_command, AddCommand};
use tracing::{info, level_filters::LevelFilter};

use crate::{
    storage::{
        archive::ArchiveStorage,
        config::{DeviceSettings, PeriodKind, Settings},
        device_lock::DeviceLock,
        entities::EntryId,
        entry_storage::EntryStorageImpl,
        folder::SharedFolder,
    },
    tracker::{error::TrackerError, NewTimer, Tracker},
    utils::{
        clock::DefaultClock,
        dir::create_application_default_path,
        logging::{enable_logging, CLI_PREFIX, WATCH_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "driftclock", version, long_about = None)]
#[command(about = "Time tracker that syncs devices through a shared folder", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Print logs to stderr")]
    log: bool,
    #[arg(
        long,
        help = "Local state directory of this device. By default $XDG_STATE_HOME/driftclock or $HOME/.local/state/driftclock"
    )]
    state_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Use a shared folder on this device, creating its layout if needed")]
    Init {
        #[arg(long, help = "Folder shared between devices, e.g. inside a cloud sync folder")]
        dir: PathBuf,
    },
    #[command(about = "Start a timer, stopping the running one")]
    Start {
        description: Vec<String>,
        #[arg(short, long)]
        project: Option<String>,
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
    #[command(about = "Stop the running timer")]
    Stop {},
    #[command(about = "Show the running timer and today's total")]
    Status {},
    #[command(about = "List completed entries, newest first")]
    Log {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
        #[arg(long, help = "Only entries started today")]
        today: bool,
    },
    #[command(about = "Add a completed entry")]
    Add {
        #[command(flatten)]
        command: AddCommand,
    },
    #[command(about = "Delete an entry by id")]
    Delete { id: String },
    #[command(about = "Show the timesheet of the current period")]
    Timesheet {},
    #[command(about = "Store the current period as a submitted timesheet")]
    Send {
        #[arg(long)]
        notes: Option<String>,
    },
    #[command(about = "List archived timesheets")]
    Archive {},
    #[command(about = "Show or change shared settings")]
    Config {
        #[arg(long)]
        period: Option<PeriodKind>,
        #[arg(long, help = "First day of weekly periods, e.g. mon")]
        week_start: Option<Weekday>,
        #[arg(long, help = "Weekday of the timesheet reminder, e.g. fri")]
        reminder_weekday: Option<Weekday>,
        #[arg(long, help = "Time of the timesheet reminder, e.g. 17:00:00")]
        reminder_time: Option<NaiveTime>,
        #[arg(long, allow_hyphen_values = true)]
        utc_offset_minutes: Option<i32>,
        #[arg(long)]
        poll_interval_seconds: Option<u64>,
        #[arg(long)]
        name: Option<String>,
    },
    #[command(about = "Keep the session open, following changes made on other devices")]
    Watch {},
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let state_dir = args
        .state_dir
        .map_or_else(create_application_default_path, Ok)?;
    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    let prefix = if matches!(args.commands, Commands::Watch {}) {
        WATCH_PREFIX
    } else {
        CLI_PREFIX
    };
    enable_logging(prefix, &state_dir, logging_level, args.log)?;

    match args.commands {
        Commands::Init { dir } => init(&state_dir, dir).await,
        Commands::Start {
            description,
            project,
            tags,
        } => {
            let tracker = open_tracker(&state_dir).await?;
            let timer = NewTimer {
                description: description.join(" "),
                project_name: project,
                tags,
            };
            let entry = locked(&state_dir, tracker.start_timer(timer), &tracker).await?;
            println!("Started {}", entry.id);
            Ok(())
        }
        Commands::Stop {} => {
            let tracker = open_tracker(&state_dir).await?;
            let entry = locked(&state_dir, tracker.stop_timer(), &tracker).await?;
            output::print_entry(&entry, Utc::now());
            Ok(())
        }
        Commands::Status {} => {
            let tracker = open_tracker(&state_dir).await?;
            let state = tracker.reload().await?;
            output::print_status(&state, tracker.settings(), Utc::now());
            Ok(())
        }
        Commands::Log { limit, today } => {
            let tracker = open_tracker(&state_dir).await?;
            let state = tracker.reload().await?;
            output::print_log(&state.completed, limit, today, Utc::now());
            Ok(())
        }
        Commands::Add { command } => {
            let tracker = open_tracker(&state_dir).await?;
            let entry = process_add_command(command)?;
            let id = entry.id.clone();
            locked(&state_dir, tracker.save_entry(entry), &tracker).await?;
            println!("Added {id}");
            Ok(())
        }
        Commands::Delete { id } => {
            let tracker = open_tracker(&state_dir).await?;
            let id = EntryId::from(id);
            let removed = locked(&state_dir, tracker.delete_entry(&id), &tracker).await?;
            println!("Deleted {}", removed.id);
            Ok(())
        }
        Commands::Timesheet {} => {
            let tracker = open_tracker(&state_dir).await?;
            tracker.reload().await?;
            output::print_timesheet(&tracker.current_timesheet(), Utc::now());
            Ok(())
        }
        Commands::Send { notes } => {
            let tracker = open_tracker(&state_dir).await?;
            tracker.reload().await?;
            let path = tracker.send_timesheet(notes).await?;
            println!("Stored {}", path.display());
            Ok(())
        }
        Commands::Archive {} => {
            let tracker = open_tracker(&state_dir).await?;
            let timesheets = tracker.archived_timesheets().await?;
            output::print_archive(&timesheets, Utc::now());
            Ok(())
        }
        Commands::Config {
            period,
            week_start,
            reminder_weekday,
            reminder_time,
            utc_offset_minutes,
            poll_interval_seconds,
            name,
        } => {
            let folder = DeviceSettings::load(&state_dir).await?.require_folder()?;
            let mut settings = Settings::load(&folder).await?;
            let before = settings.clone();
            if let Some(v) = period {
                settings.period = v;
            }
            if let Some(v) = week_start {
                settings.week_start = v;
            }
            if let Some(v) = reminder_weekday {
                settings.reminder_weekday = v;
            }
            if let Some(v) = reminder_time {
                settings.reminder_time = v;
            }
            if let Some(v) = utc_offset_minutes {
                settings.utc_offset = FixedOffset::east_opt(v * 60)
                    .ok_or_else(|| anyhow::anyhow!("{v} minutes is not a valid utc offset"))?;
            }
            if let Some(v) = poll_interval_seconds {
                settings.poll_interval_seconds = v;
            }
            if name.is_some() {
                settings.user_name = name;
            }
            if settings != before {
                settings.save(&folder).await?;
                info!("Updated shared settings");
            }
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Commands::Watch {} => {
            let tracker = open_tracker(&state_dir).await?;
            watch::run_watch(tracker).await
        }
    }
}

async fn init(state_dir: &Path, dir: PathBuf) -> Result<()> {
    let dir = std::path::absolute(&dir)?;
    let folder = SharedFolder::new(&dir);
    folder.ensure_layout().await?;

    // Another device may have configured the folder already, keep its settings.
    if !tokio::fs::try_exists(folder.config_path()).await? {
        Settings::with_local_offset().save(&folder).await?;
    }

    DeviceSettings {
        shared_folder: Some(dir.clone()),
    }
    .save(state_dir)
    .await?;
    println!("Using {}", dir.display());
    Ok(())
}

async fn open_tracker(state_dir: &Path) -> Result<Tracker<EntryStorageImpl>> {
    let folder = DeviceSettings::load(state_dir).await?.require_folder()?;
    let settings = Settings::load(&folder).await?;
    Ok(Tracker::new(
        EntryStorageImpl::new(Some(folder.clone())),
        ArchiveStorage::new(Some(folder)),
        settings,
        DefaultClock,
    ))
}

/// Runs a mutation under the device lock, after refreshing the view so the change applies to
/// the latest shared state.
async fn locked<T>(
    state_dir: &Path,
    mutation: impl Future<Output = Result<T, TrackerError>>,
    tracker: &Tracker<EntryStorageImpl>,
) -> Result<T> {
    let lock = DeviceLock::acquire(state_dir).await?;
    let result = async {
        tracker.reload().await?;
        Ok::<T, anyhow::Error>(mutation.await?)
    }
    .await;
    lock.release().await?;
    result
}
