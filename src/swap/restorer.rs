use std::{
    ffi::OsString,
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use rusqlite::{Connection, OpenFlags};
use serde::Serialize;

use crate::errors::{ResetError, Result};

/// Knows how to overwrite the live datastore with its clean snapshot.
///
/// Implementations are blocking; the swap runs them on the blocking pool.
pub trait DatastoreRestorer: Send + Sync {
    /// Confirm the snapshot is present and readable without touching the
    /// live store.
    fn check_snapshot(&self) -> Result<SnapshotInfo>;

    fn restore(&self) -> Result<RestoreReport>;
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub version: i32,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub bytes_copied: u64,
    pub snapshot_version: i32,
}

/// Restores a SQLite database file from a clean SQLite file.
///
/// The snapshot is streamed into a temp file beside the live database,
/// synced, integrity-checked and then renamed over the live file, so a crash
/// at any point leaves either the old or the new database, never a mix.
/// The clean snapshot must be checkpointed (no pending `-wal` content).
#[derive(Debug, Clone)]
pub struct SqliteFileRestorer {
    live_path: PathBuf,
    clean_path: PathBuf,
}

impl SqliteFileRestorer {
    pub fn new(live_path: PathBuf, clean_path: PathBuf) -> Self {
        Self {
            live_path,
            clean_path,
        }
    }

    pub fn live_path(&self) -> &Path {
        &self.live_path
    }

    pub fn clean_path(&self) -> &Path {
        &self.clean_path
    }

    fn missing(&self, reason: impl std::fmt::Display) -> ResetError {
        ResetError::SnapshotMissing {
            path: self.clean_path.clone(),
            reason: reason.to_string(),
        }
    }

    fn staging_dir(&self) -> PathBuf {
        match self.live_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

impl DatastoreRestorer for SqliteFileRestorer {
    fn check_snapshot(&self) -> Result<SnapshotInfo> {
        let metadata = fs::metadata(&self.clean_path).map_err(|err| self.missing(err))?;
        if !metadata.is_file() {
            return Err(self.missing("not a regular file"));
        }

        let conn = Connection::open_with_flags(
            &self.clean_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| self.missing(err))?;
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(|err| self.missing(err))?;

        Ok(SnapshotInfo {
            path: self.clean_path.clone(),
            version,
            size_bytes: metadata.len(),
        })
    }

    fn restore(&self) -> Result<RestoreReport> {
        let info = self.check_snapshot()?;

        let staging_dir = self.staging_dir();
        fs::create_dir_all(&staging_dir)
            .map_err(|err| ResetError::io("failed to create live directory", err))?;

        let mut source = File::open(&self.clean_path).map_err(|err| self.missing(err))?;
        let source_permissions = source
            .metadata()
            .map_err(|err| self.missing(err))?
            .permissions();

        let mut staged = tempfile::Builder::new()
            .prefix(".demo-restore-")
            .suffix(".sqlite3")
            .tempfile_in(&staging_dir)
            .map_err(|err| ResetError::io("failed to create staging file", err))?;

        let bytes_copied = io::copy(&mut source, staged.as_file_mut())
            .map_err(|err| ResetError::io("failed to copy snapshot", err))?;
        staged
            .as_file()
            .sync_all()
            .map_err(|err| ResetError::io("failed to sync staged copy", err))?;
        fs::set_permissions(staged.path(), source_permissions)
            .map_err(|err| ResetError::io("failed to copy snapshot permissions", err))?;

        verify_staged(staged.path())?;

        // A leftover WAL from the old database would be replayed onto the new one.
        for sidecar in ["-wal", "-shm"] {
            remove_if_exists(&sibling(&self.live_path, sidecar))?;
        }

        staged
            .persist(&self.live_path)
            .map_err(|err| ResetError::io("failed to move staged copy into place", err.error))?;

        if let Ok(dir) = File::open(&staging_dir) {
            let _ = dir.sync_all();
        }

        Ok(RestoreReport {
            bytes_copied,
            snapshot_version: info.version,
        })
    }
}

fn verify_staged(path: &Path) -> Result<()> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|err| ResetError::io("failed to open staged copy", err))?;
    let verdict: String = conn
        .query_row("PRAGMA quick_check", [], |row| row.get(0))
        .map_err(|err| ResetError::io("integrity check failed", err))?;
    if verdict != "ok" {
        return Err(ResetError::SwapIo(format!(
            "staged copy failed integrity check: {verdict}"
        )));
    }
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(ResetError::io(
            &format!("failed to remove {}", path.display()),
            err,
        )),
    }
}
