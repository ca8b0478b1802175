//! Single running instance per data directory
//!
//! Two bots polling the same account would double-process every update and
//! race on the ban table, so startup takes an exclusive `fs2` lock on
//! `bot.lock` and keeps it until the process exits.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum LockError {
    CreateFailed(io::Error),
    /// Another process holds the lock
    AlreadyRunning { pid: Option<u32>, path: PathBuf },
    WriteFailed(io::Error),
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::CreateFailed(e) => write!(f, "Failed to create lock file: {}", e),
            LockError::AlreadyRunning { pid: Some(pid), path } => write!(
                f,
                "Another bot instance is running (pid {}, {})",
                pid,
                path.display()
            ),
            LockError::AlreadyRunning { pid: None, path } => {
                write!(f, "Another bot instance is running ({})", path.display())
            }
            LockError::WriteFailed(e) => write!(f, "Failed to write PID to lock file: {}", e),
        }
    }
}

impl std::error::Error for LockError {}

/// Held for the life of the process; released on drop
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(LockError::CreateFailed)?;
        }

        // No truncate here: a failed attempt must not wipe the holder's pid
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(LockError::CreateFailed)?;

        if file.try_lock_exclusive().is_err() {
            return Err(LockError::AlreadyRunning {
                pid: Self::read_pid(path),
                path: path.to_path_buf(),
            });
        }

        file.set_len(0).map_err(LockError::WriteFailed)?;
        file.seek(SeekFrom::Start(0)).map_err(LockError::WriteFailed)?;
        writeln!(file, "{}", std::process::id()).map_err(LockError::WriteFailed)?;
        file.sync_all().map_err(LockError::WriteFailed)?;

        log::info!("🔒 Instance lock acquired: {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_pid(path: &Path) -> Option<u32> {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        let _ = std::fs::remove_file(&self.path);
    }
}
