use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;
use tracing::{debug, warn};

use crate::domain::DestinationPath;
use crate::error::ArchiveError;
use crate::planner::content_digest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMethod {
    Link,
    VerifiedCopy,
}

/// Relocates staged files into the archive. The file is present in at least
/// one of the two places at every instant.
pub struct Mover {
    staging_root: Utf8PathBuf,
}

impl Mover {
    pub fn new(staging_root: Utf8PathBuf) -> Self {
        Self { staging_root }
    }

    pub fn relocate(
        &self,
        source: &Utf8Path,
        destination: &DestinationPath,
    ) -> Result<MoveMethod, ArchiveError> {
        let target = destination.full();
        let dir = destination.dir();
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| ArchiveError::Io(format!("create {dir}: {err}")))?;

        if target.as_std_path().exists() {
            return Err(ArchiveError::MoveConflict(target.to_string()));
        }

        let method = match fs::hard_link(source.as_std_path(), target.as_std_path()) {
            Ok(()) => MoveMethod::Link,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(ArchiveError::MoveConflict(target.to_string()));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ArchiveError::Io(format!("link {source}: {err}")));
            }
            Err(err) => {
                debug!(%source, error = %err, "hard link unavailable, copying");
                copy_verified(source, &dir, &target)?;
                MoveMethod::VerifiedCopy
            }
        };

        fs::remove_file(source.as_std_path())
            .map_err(|err| ArchiveError::Io(format!("remove staged {source}: {err}")))?;
        self.prune_empty_parent(source);
        Ok(method)
    }

    /// Copies an archived file to a second destination. An identical file
    /// already there counts as copied; a different one is a conflict.
    pub fn duplicate(
        &self,
        archived: &Utf8Path,
        copy: &DestinationPath,
    ) -> Result<bool, ArchiveError> {
        let target = copy.full();
        if target.as_std_path().exists() {
            if content_digest(archived)? == content_digest(&target)? {
                debug!(%target, "duplicate already in place");
                return Ok(false);
            }
            return Err(ArchiveError::MoveConflict(target.to_string()));
        }
        let dir = copy.dir();
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| ArchiveError::Io(format!("create {dir}: {err}")))?;
        copy_verified(archived, &dir, &target)?;
        Ok(true)
    }

    /// Drops the staging sub-folder a file came from once it is empty.
    fn prune_empty_parent(&self, source: &Utf8Path) {
        let Some(parent) = source.parent() else {
            return;
        };
        if parent == self.staging_root || !parent.starts_with(&self.staging_root) {
            return;
        }
        let is_empty = fs::read_dir(parent.as_std_path())
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if is_empty {
            if let Err(err) = fs::remove_dir(parent.as_std_path()) {
                warn!(folder = %parent, error = %err, "could not remove empty staging folder");
            }
        }
    }
}

fn copy_verified(source: &Utf8Path, dir: &Utf8Path, target: &Utf8Path) -> Result<(), ArchiveError> {
    let temp = Builder::new()
        .prefix(".specimen-archiver-move")
        .tempfile_in(dir.as_std_path())
        .map_err(|err| ArchiveError::Io(format!("temp file in {dir}: {err}")))?;
    fs::copy(source.as_std_path(), temp.path())
        .map_err(|err| ArchiveError::Io(format!("copy {source}: {err}")))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| ArchiveError::Io(format!("sync copy of {source}: {err}")))?;

    let temp_path = Utf8PathBuf::from_path_buf(temp.path().to_path_buf())
        .map_err(|_| ArchiveError::Io("non-utf8 temp path".to_string()))?;
    if content_digest(source)? != content_digest(&temp_path)? {
        return Err(ArchiveError::Io(format!(
            "copy of {source} does not match the original"
        )));
    }

    temp.persist_noclobber(target.as_std_path())
        .map_err(|err| match err.error.kind() {
            io::ErrorKind::AlreadyExists => ArchiveError::MoveConflict(target.to_string()),
            _ => ArchiveError::Io(format!("persist {target}: {}", err.error)),
        })?;
    Ok(())
}
