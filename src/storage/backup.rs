//! Point-in-time backup, restore, and rotation.
//!
//! SQLite databases are copied with the engine's native online-backup API,
//! which produces a consistent snapshot without blocking readers. Directory
//! sources fall back to a recursive file copy. Rotation keeps the newest K
//! backups by modification time.

use crate::{Error, Result};
use rusqlite::backup::Backup;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// One discovered backup file.
#[derive(Debug, Clone)]
pub struct BackupRecord {
    /// Location of the backup.
    pub path: PathBuf,
    /// Modification time, used for rotation ordering.
    pub created_at: SystemTime,
}

/// Online backup and rotation over a storage path.
#[derive(Debug, Clone)]
pub struct BackupStrategy {
    /// Pages copied per backup step.
    pages_per_step: std::ffi::c_int,
    /// Pause between steps, yielding the database to writers.
    step_pause: Duration,
}

impl Default for BackupStrategy {
    fn default() -> Self {
        Self {
            pages_per_step: 100,
            step_pause: Duration::from_millis(10),
        }
    }
}

impl BackupStrategy {
    /// Creates a strategy with default stepping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies `source` to `dest`.
    ///
    /// A file source is treated as a SQLite database and copied online; a
    /// directory source is copied recursively. The destination's parent
    /// directory is created when missing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Operation`] when the source is missing or the copy
    /// fails.
    pub fn backup(&self, source: &Path, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Operation {
                operation: "create_backup_dir".to_string(),
                cause: e.to_string(),
            })?;
        }

        if source.is_dir() {
            copy_dir_recursive(source, dest)?;
        } else {
            self.backup_sqlite(source, dest)?;
        }

        tracing::info!(
            source = %source.display(),
            dest = %dest.display(),
            "backup completed"
        );
        Ok(())
    }

    /// Restores `backup` over `dest`.
    ///
    /// Symmetric to [`Self::backup`]. Callers are responsible for
    /// disconnecting every live connection before restoring and reconnecting
    /// after.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Operation`] when the backup is missing or the copy
    /// fails.
    pub fn restore(&self, backup: &Path, dest: &Path) -> Result<()> {
        if !backup.exists() {
            return Err(Error::Operation {
                operation: "restore".to_string(),
                cause: format!("backup '{}' does not exist", backup.display()),
            });
        }
        // Stale WAL/SHM sidecars from the replaced database must not shadow
        // the restored pages
        for suffix in ["-wal", "-shm"] {
            let _ = std::fs::remove_file(sidecar_path(dest, suffix));
        }
        self.backup(backup, dest)
    }

    /// Online copy of one SQLite database.
    fn backup_sqlite(&self, source: &Path, dest: &Path) -> Result<()> {
        let src = Connection::open_with_flags(source, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(
            |e| Error::Operation {
                operation: "open_backup_source".to_string(),
                cause: e.to_string(),
            },
        )?;
        let mut dst = Connection::open(dest).map_err(|e| Error::Operation {
            operation: "open_backup_dest".to_string(),
            cause: e.to_string(),
        })?;

        let backup = Backup::new(&src, &mut dst).map_err(|e| Error::Operation {
            operation: "start_backup".to_string(),
            cause: e.to_string(),
        })?;
        backup
            .run_to_completion(self.pages_per_step, self.step_pause, None)
            .map_err(|e| Error::Operation {
                operation: "run_backup".to_string(),
                cause: e.to_string(),
            })
    }

    /// Deletes every backup in `dir` beyond the newest `keep_n`.
    ///
    /// Returns how many files were removed. A missing directory removes
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Operation`] when the directory cannot be listed or a
    /// stale backup cannot be deleted.
    pub fn cleanup_old_backups(&self, dir: &Path, keep_n: usize) -> Result<u64> {
        let mut backups = list_backups(dir)?;
        if backups.len() <= keep_n {
            return Ok(0);
        }

        // Newest first; everything past keep_n goes
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let mut removed = 0u64;
        for stale in &backups[keep_n..] {
            std::fs::remove_file(&stale.path).map_err(|e| Error::Operation {
                operation: "remove_stale_backup".to_string(),
                cause: format!("{}: {e}", stale.path.display()),
            })?;
            removed += 1;
        }

        if removed > 0 {
            tracing::info!(removed, kept = keep_n, dir = %dir.display(), "rotated backups");
        }
        Ok(removed)
    }
}

/// Lists backup files in a directory with their modification times.
fn list_backups(dir: &Path) -> Result<Vec<BackupRecord>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(dir).map_err(|e| Error::Operation {
        operation: "list_backups".to_string(),
        cause: e.to_string(),
    })?;

    let mut backups = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::Operation {
            operation: "list_backups".to_string(),
            cause: e.to_string(),
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let created_at = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        backups.push(BackupRecord { path, created_at });
    }
    Ok(backups)
}

/// Copies a directory tree.
fn copy_dir_recursive(source: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest).map_err(|e| Error::Operation {
        operation: "copy_tree".to_string(),
        cause: e.to_string(),
    })?;
    let entries = std::fs::read_dir(source).map_err(|e| Error::Operation {
        operation: "copy_tree".to_string(),
        cause: e.to_string(),
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::Operation {
            operation: "copy_tree".to_string(),
            cause: e.to_string(),
        })?;
        let target = dest.join(entry.file_name());
        if entry.path().is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| Error::Operation {
                operation: "copy_tree".to_string(),
                cause: format!("{}: {e}", entry.path().display()),
            })?;
        }
    }
    Ok(())
}

/// Appends a suffix to a database path (`state.db` -> `state.db-wal`).
fn sidecar_path(db_path: &Path, suffix: &str) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
