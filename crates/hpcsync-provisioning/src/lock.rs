//! Run lock.
//!
//! At most one run per target system may hold the lock. Exclusion comes from
//! an advisory `flock(LOCK_EX | LOCK_NB)` on the lock file, so the kernel
//! releases it when the holder dies, however it dies. The file itself only
//! records the holder's pid for error messages; a leftover file from a
//! killed run is simply locked again by the next one.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

/// Exclusive lock held for the duration of a run.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    // Holds the flock; closing it releases the lock.
    _file: File,
}

impl RunLock {
    /// Lock file for `target` inside `state_dir` (`<target>.lock`).
    pub fn path_for(state_dir: &Path, target: &str) -> PathBuf {
        state_dir.join(format!("{target}.lock"))
    }

    /// Lock the file and record this process's pid in it.
    ///
    /// Fails with [`SyncError::Locked`] while another live process holds
    /// the lock.
    pub fn acquire(path: impl Into<PathBuf>) -> SyncResult<Self> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let mut file = loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            if !try_flock_exclusive(&file)? {
                let holder = fs::read_to_string(&path)
                    .ok()
                    .and_then(|s| s.trim().parse::<u32>().ok());
                return Err(SyncError::Locked { path, holder });
            }
            // A previous holder may have unlinked the file between our open
            // and our flock; the lock then guards nothing.
            if still_linked(&file, &path) {
                break file;
            }
            debug!(path = %path.display(), "Lock file replaced while locking, retrying");
        };

        if let Err(e) = record_pid(&mut file) {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(e.into());
        }

        debug!(path = %path.display(), "Run lock acquired");
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // Unlink while still locked; the flock goes when `_file` closes.
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove run lock");
        }
    }
}

fn record_pid(file: &mut File) -> io::Result<()> {
    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    file.sync_all()
}

/// Try to take an exclusive flock without blocking.
///
/// Returns `Ok(false)` when another open file description holds it.
fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: flock only reads the descriptor, which `file` owns and
        // keeps open for the duration of the call.
        #[allow(unsafe_code)]
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}

/// Whether `path` still names the open `file`.
fn still_linked(file: &File, path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        match (file.metadata(), fs::metadata(path)) {
            (Ok(open), Ok(named)) => open.dev() == named.dev() && open.ino() == named.ino(),
            _ => false,
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (file, path);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = RunLock::path_for(dir.path(), "directory");

        let lock = RunLock::acquire(&path).unwrap();
        assert!(path.exists());

        match RunLock::acquire(&path) {
            Err(SyncError::Locked { holder, .. }) => {
                assert_eq!(holder, Some(std::process::id()));
            }
            other => panic!("expected Locked, got {other:?}"),
        }

        drop(lock);
        assert!(!path.exists());
        assert!(RunLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_leftover_file_from_dead_run_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = RunLock::path_for(dir.path(), "accounting");
        fs::write(&path, "999999\n").unwrap();

        let lock = RunLock::acquire(&path).unwrap();

        assert_eq!(
            fs::read_to_string(lock.path()).unwrap().trim(),
            std::process::id().to_string()
        );
    }

    #[test]
    fn test_acquire_creates_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = RunLock::path_for(&dir.path().join("state"), "storage");

        let lock = RunLock::acquire(&path).unwrap();
        assert_eq!(lock.path(), path.as_path());
    }
}
