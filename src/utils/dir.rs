use std::{env, io, path::PathBuf};

use anyhow::{anyhow, Result};

/// Local state directory of this device. Holds device settings, logs and the mutation lock,
/// nothing in here is shared between devices.
pub fn create_application_default_path() -> Result<PathBuf> {
    let path = {
        #[cfg(windows)]
        {
            let mut path = env::var("LOCALAPPDATA")
                .or_else(|_| env::var("APPDATA"))
                .map(PathBuf::from)
                .map_err(|_| anyhow!("Neither LOCALAPPDATA nor APPDATA is set"))?;
            path.push("driftclock");
            path
        }
        #[cfg(not(windows))]
        {
            let mut path = env::var("XDG_STATE_HOME")
                .map(PathBuf::from)
                .or_else(|_| {
                    env::var("HOME").map(|home| {
                        let mut path = PathBuf::from(home);
                        path.push(".local/state");
                        path
                    })
                })
                .map_err(|_| anyhow!("Couldn't find neither XDG_STATE_HOME nor HOME"))?;
            path.push("driftclock");
            path
        }
    };

    match std::fs::create_dir_all(&path) {
        Ok(_) => Ok(path),
        Err(v) if v.kind() == io::ErrorKind::AlreadyExists => Ok(path),
        Err(v) => Err(v.into()),
    }
}
