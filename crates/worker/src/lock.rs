#![forbid(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub(crate) enum LockError {
    #[error(
        "another worker ({}) already serves this queue ({})",
        describe_holder(*pid),
        path.display()
    )]
    Held { pid: Option<u32>, path: PathBuf },
    #[error("worker lock {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

fn describe_holder(pid: Option<u32>) -> String {
    pid.map_or_else(|| "pid unknown".to_string(), |pid| format!("pid {pid}"))
}

/// Exclusive claim on a queue directory: at most one live worker per store.
///
/// On unix this is an advisory `flock` on `worker.pid`; the kernel drops it
/// when the process dies, so a leftover file never blocks a new worker. The
/// pid written into the file is informational only.
pub(crate) struct WorkerLock {
    path: PathBuf,
    #[cfg(unix)]
    file: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    file: File,
}

impl std::fmt::Debug for WorkerLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLock").field("path", &self.path).finish()
    }
}

impl WorkerLock {
    pub(crate) fn acquire(path: &Path) -> Result<Self, LockError> {
        let io_err = |source: io::Error| LockError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut file = lock_file(path)?;
        // Only the holder writes, so readers see either nothing or this pid.
        file.set_len(0).map_err(io_err)?;
        writeln!(file, "{}", std::process::id()).map_err(io_err)?;
        file.flush().map_err(io_err)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn lock_file(path: &Path) -> Result<nix::fcntl::Flock<File>, LockError> {
    use nix::errno::Errno;
    use nix::fcntl::{Flock, FlockArg};

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|source| LockError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(locked) => Ok(locked),
        Err((_, errno)) if errno == Errno::EWOULDBLOCK => Err(LockError::Held {
            pid: read_holder(path),
            path: path.to_path_buf(),
        }),
        Err((_, errno)) => Err(LockError::Io {
            path: path.to_path_buf(),
            source: io::Error::from(errno),
        }),
    }
}

/// Without `flock`, the file's existence is the lock; a crashed worker's file
/// has to be removed by hand.
#[cfg(not(unix))]
fn lock_file(path: &Path) -> Result<File, LockError> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(file),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Err(LockError::Held {
            pid: read_holder(path),
            path: path.to_path_buf(),
        }),
        Err(source) => Err(LockError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

impl Drop for WorkerLock {
    #[cfg(unix)]
    fn drop(&mut self) {
        // The file stays: unlinking a flocked path lets a waiter lock a dead inode.
        let _ = self.file.set_len(0);
    }

    #[cfg(not(unix))]
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn read_holder(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| text.trim().parse::<u32>().ok())
}
