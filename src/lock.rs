use std::fs::{self, OpenOptions};
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{SecondsFormat, Utc};
use tracing::{debug, warn};

use crate::error::ArchiveError;

pub const LOCK_FILE: &str = ".specimen-archiver.lock";

/// Exclusive claim on a staging root, released on drop.
#[derive(Debug)]
pub struct RunLock {
    path: Utf8PathBuf,
}

impl RunLock {
    pub fn acquire(staging_root: &Utf8Path, break_lock: bool) -> Result<Self, ArchiveError> {
        let path = staging_root.join(LOCK_FILE);
        if break_lock {
            match fs::remove_file(path.as_std_path()) {
                Ok(()) => warn!(lock = %path, "removed existing run lock"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(ArchiveError::Io(format!("remove {path}: {err}"))),
            }
        }

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path.as_std_path())
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(ArchiveError::LockHeld(path.into_std_path_buf()));
            }
            Err(err) => return Err(ArchiveError::Io(format!("create {path}: {err}"))),
        };
        writeln!(
            file,
            "pid={}\nstarted={}",
            std::process::id(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        )
        .map_err(|err| ArchiveError::Io(format!("write {path}: {err}")))?;
        debug!(lock = %path, "run lock acquired");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(self.path.as_std_path()) {
            warn!(lock = %self.path, error = %err, "could not release run lock");
        }
    }
}
