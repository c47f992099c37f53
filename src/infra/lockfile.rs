//! File-based locking between forgeroot processes
//!
//! An advisory `flock` on `<work>/chroot_<name>.lock` keeps two forgeroot
//! processes from using the same chroot, and one on `index.json.lock`
//! serializes artifact index updates. Within one process callers serialize
//! on an async mutex first, so the file lock only ever waits on other
//! processes.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Metadata written into a held lock file
#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
    pub version: u32,
    pub pid: u32,
    pub started_at_unix: u64,
    pub command: String,
}

/// A held exclusive lock, released on drop
#[derive(Debug)]
pub struct LockFile {
    file: File,
    path: PathBuf,
}

impl LockFile {
    /// Try to take the lock once
    ///
    /// Returns `Ok(None)` when another process holds it.
    pub fn try_acquire(path: &Path, command: &str) -> io::Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if let Err(err) = try_lock(&file) {
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(None);
            }
            return Err(err);
        }

        let lock = Self {
            file,
            path: path.to_path_buf(),
        };
        lock.write_metadata(command)?;
        Ok(Some(lock))
    }

    /// Take the lock, polling every `poll` until it is free
    pub async fn acquire(path: &Path, command: &str, poll: Duration) -> io::Result<Self> {
        let mut announced = false;
        loop {
            if let Some(lock) = Self::try_acquire(path, command)? {
                return Ok(lock);
            }
            if !announced {
                match Self::holder(path) {
                    Some(meta) => tracing::info!(
                        "Waiting for lock {} held by '{}' (PID {})",
                        path.display(),
                        meta.command,
                        meta.pid
                    ),
                    None => tracing::info!("Waiting for lock {}", path.display()),
                }
                announced = true;
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Metadata of the current holder, if readable
    pub fn holder(path: &Path) -> Option<LockMetadata> {
        let mut contents = String::new();
        File::open(path).ok()?.read_to_string(&mut contents).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Whether some process holds the lock right now
    pub fn is_locked(path: &Path) -> bool {
        if !path.exists() {
            return false;
        }
        match File::open(path) {
            Ok(file) => match try_lock(&file) {
                Ok(()) => false,
                Err(err) => err.kind() == io::ErrorKind::WouldBlock,
            },
            Err(_) => false,
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_metadata(&self, command: &str) -> io::Result<()> {
        let metadata = LockMetadata {
            version: 1,
            pid: std::process::id(),
            started_at_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            command: command.to_string(),
        };

        self.file.set_len(0)?;
        let mut writer = io::BufWriter::new(&self.file);
        serde_json::to_writer_pretty(&mut writer, &metadata).map_err(io::Error::other)?;
        writer.flush()
    }
}

#[cfg(unix)]
fn try_lock(file: &File) -> io::Result<()> {
    use rustix::fs::{flock, FlockOperation};
    use std::os::unix::io::AsFd;

    flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive)
        .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(not(unix))]
fn try_lock(_file: &File) -> io::Result<()> {
    Ok(())
}
