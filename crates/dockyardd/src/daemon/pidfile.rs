//! Pidfile ownership for the running daemon.
//!
//! The owner holds an exclusive `flock` on the pidfile for as long as the
//! [`PidFile`] guard lives. A file nobody has locked is stale, whatever it
//! contains, unless it names another live process.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};

use camino::{Utf8Path, Utf8PathBuf};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{info, warn};

use super::DAEMON_TARGET;

// The previous owner may unlink the file between our open and our lock.
const CLAIM_ATTEMPTS: usize = 3;

/// Errors raised while claiming the pidfile.
#[derive(Debug, Error)]
pub enum PidFileError {
    /// Another live process owns the pidfile.
    #[error("pid file {path} is owned by running process {}; is the daemon already running?", display_pid(.pid))]
    AlreadyRunning {
        /// Pidfile path.
        path: Utf8PathBuf,
        /// Process recorded in the file, when it could be read.
        pid: Option<u32>,
    },
    /// The pidfile could not be opened or read.
    #[error("failed to read pid file {path}: {source}")]
    Read {
        /// Pidfile path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The pidfile could not be locked.
    #[error("failed to lock pid file {path}: {source}")]
    Lock {
        /// Pidfile path.
        path: Utf8PathBuf,
        /// Underlying errno.
        #[source]
        source: Errno,
    },
    /// The pidfile could not be written.
    #[error("failed to write pid file {path}: {source}")]
    Write {
        /// Pidfile path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The pidfile kept being replaced while it was being claimed.
    #[error("pid file {path} kept changing while it was being claimed")]
    Contended {
        /// Pidfile path.
        path: Utf8PathBuf,
    },
}

fn display_pid(pid: &Option<u32>) -> String {
    pid.map_or_else(|| "<unknown>".to_owned(), |pid| pid.to_string())
}

/// Pidfile claimed by this process; removed again when dropped.
pub struct PidFile {
    path: Utf8PathBuf,
    pid: u32,
    // Released after the file is unlinked in `drop`.
    _lock: Flock<File>,
}

impl PidFile {
    /// Claims `path` for the current process.
    ///
    /// A pidfile nobody holds locked that names a process which no longer
    /// exists, or holds garbage, is treated as stale and overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`PidFileError::AlreadyRunning`] when another daemon holds
    /// the file or the recorded process is alive, or an IO variant when the
    /// file cannot be handled.
    pub fn acquire(path: &Utf8Path) -> Result<Self, PidFileError> {
        Self::acquire_for(path, std::process::id())
    }

    fn acquire_for(path: &Utf8Path, pid: u32) -> Result<Self, PidFileError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| PidFileError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }

        for _ in 0..CLAIM_ATTEMPTS {
            let file = open_pidfile(path).map_err(|source| PidFileError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let mut lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(lock) => lock,
                Err((mut file, Errno::EWOULDBLOCK)) => {
                    return Err(PidFileError::AlreadyRunning {
                        path: path.to_path_buf(),
                        pid: read_recorded(&mut file).ok().flatten(),
                    });
                }
                Err((_file, source)) => {
                    return Err(PidFileError::Lock {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            };
            if !still_linked(path, &lock) {
                continue;
            }

            let recorded = read_recorded(&mut lock).map_err(|source| PidFileError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            if let Some(existing) = recorded.filter(|existing| *existing != pid) {
                if process_alive(existing) {
                    return Err(PidFileError::AlreadyRunning {
                        path: path.to_path_buf(),
                        pid: Some(existing),
                    });
                }
                warn!(
                    target: DAEMON_TARGET,
                    file = %path,
                    pid = existing,
                    "replacing stale pid file"
                );
            }

            write_pid(&mut lock, pid).map_err(|source| PidFileError::Write {
                path: path.to_path_buf(),
                source,
            })?;
            info!(target: DAEMON_TARGET, file = %path, pid, "pid file written");
            return Ok(Self {
                path: path.to_path_buf(),
                pid,
                _lock: lock,
            });
        }
        Err(PidFileError::Contended {
            path: path.to_path_buf(),
        })
    }

    /// Pidfile path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Process id recorded in the file.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }
}

impl fmt::Debug for PidFile {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PidFile")
            .field("path", &self.path)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => info!(target: DAEMON_TARGET, file = %self.path, "pid file removed"),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!(
                target: DAEMON_TARGET,
                file = %self.path,
                error = %error,
                "failed to remove pid file"
            ),
        }
    }
}

fn open_pidfile(path: &Utf8Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o644)
        .open(path)
}

/// Whether `path` still names the file behind `lock`.
fn still_linked(path: &Utf8Path, lock: &File) -> bool {
    match (fs::metadata(path), lock.metadata()) {
        (Ok(on_disk), Ok(held)) => on_disk.dev() == held.dev() && on_disk.ino() == held.ino(),
        _ => false,
    }
}

/// Reads the recorded pid; empty or garbled contents read as `None`.
fn read_recorded(file: &mut File) -> io::Result<Option<u32>> {
    let mut contents = String::new();
    file.rewind()?;
    file.read_to_string(&mut contents)?;
    Ok(contents.trim().parse().ok())
}

fn write_pid(file: &mut File, pid: u32) -> io::Result<()> {
    file.set_len(0)?;
    file.rewind()?;
    file.write_all(format!("{pid}\n").as_bytes())?;
    file.sync_all()
}

fn process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
