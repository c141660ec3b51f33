use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{FixedOffset, Local, NaiveDate, NaiveTime, Offset, Weekday};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::fs::operations::{read_json_file, replace_file, to_json_bytes};

use super::{error::StorageError, folder::SharedFolder};

const DEVICE_SETTINGS_FILE: &str = "device.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    #[default]
    Weekly,
    Biweekly,
    Monthly,
}

/// User settings shared by every device, stored as `config.json` in the shared folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub user_name: Option<String>,
    pub period: PeriodKind,
    /// First day of weekly and biweekly periods.
    pub week_start: Weekday,
    /// Any day that starts a biweekly period.
    pub biweekly_anchor: NaiveDate,
    pub reminder_weekday: Weekday,
    pub reminder_time: NaiveTime,
    /// Timezone used for calendar days, as an offset from UTC. Missing means UTC so every
    /// device derives the same period keys.
    #[serde(with = "offset_ser", rename = "utcOffsetMinutes")]
    pub utc_offset: FixedOffset,
    pub poll_interval_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_name: None,
            period: PeriodKind::Weekly,
            week_start: Weekday::Mon,
            biweekly_anchor: NaiveDate::from_ymd_opt(2024, 1, 1).expect("Valid constant date"),
            reminder_weekday: Weekday::Fri,
            reminder_time: NaiveTime::from_hms_opt(17, 0, 0).expect("Valid constant time"),
            utc_offset: FixedOffset::east_opt(0).expect("Valid constant offset"),
            poll_interval_seconds: 5,
        }
    }
}

impl Settings {
    /// Defaults with the timezone of this machine. Used when a folder is set up for the first
    /// time, later devices take the offset from `config.json`.
    pub fn with_local_offset() -> Self {
        Self {
            utc_offset: Local::now().offset().fix(),
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }

    pub async fn load(folder: &SharedFolder) -> Result<Self, StorageError> {
        Ok(read_json_file::<Self>(&folder.config_path())
            .await?
            .unwrap_or_default())
    }

    pub async fn save(&self, folder: &SharedFolder) -> Result<(), StorageError> {
        folder.ensure_layout().await?;
        let path = folder.config_path();
        let buffer = to_json_bytes(&path, self)?;
        replace_file(&path, &buffer)
            .await
            .map_err(|e| StorageError::io(&path, e))
    }
}

mod offset_ser {
    use chrono::FixedOffset;
    use serde::{self, de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(offset: &FixedOffset, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i32(offset.local_minus_utc() / 60)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<FixedOffset, D::Error>
    where
        D: Deserializer<'de>,
    {
        let minutes = i32::deserialize(deserializer)?;
        FixedOffset::east_opt(minutes * 60)
            .ok_or_else(|| D::Error::custom(format!("{minutes} minutes is not a valid utc offset")))
    }
}

/// Settings that belong to a single device, kept in its local state directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceSettings {
    pub shared_folder: Option<PathBuf>,
}

impl DeviceSettings {
    pub async fn load(state_dir: &Path) -> Result<Self, StorageError> {
        Ok(read_json_file::<Self>(&state_dir.join(DEVICE_SETTINGS_FILE))
            .await?
            .unwrap_or_default())
    }

    pub async fn save(&self, state_dir: &Path) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(state_dir)
            .await
            .map_err(|e| StorageError::io(state_dir, e))?;
        let path = state_dir.join(DEVICE_SETTINGS_FILE);
        let buffer = to_json_bytes(&path, self)?;
        replace_file(&path, &buffer)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        info!("Device now uses {:?}", self.shared_folder);
        Ok(())
    }

    pub fn folder(&self) -> Option<SharedFolder> {
        self.shared_folder.clone().map(SharedFolder::new)
    }

    pub fn require_folder(&self) -> Result<SharedFolder, StorageError> {
        self.folder().ok_or(StorageError::ConfigurationMissing)
    }
}
