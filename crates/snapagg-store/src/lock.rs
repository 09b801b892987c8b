//! Single-writer lock for the output directory.
//!
//! Runs are expected to be serialized by the scheduler. The lock turns an
//! accidental overlap into a clean refusal instead of a lost update.
//!
//! The lock is an advisory `flock` on `.snapagg.lock`, so the kernel drops
//! it when the holder dies, however it dies. The file itself is left in
//! place and only records the pid of the last holder.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Lock file name inside the output directory.
pub const LOCK_FILENAME: &str = ".snapagg.lock";

/// Held for the lifetime of a run; unlocked on drop.
#[derive(Debug)]
pub struct StoreLock {
    lock_path: PathBuf,
    file: File,
}

impl StoreLock {
    /// Acquire the lock in `output_dir`, creating the directory if needed.
    pub fn acquire(output_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(output_dir).map_err(|e| StoreError::io(output_dir, e))?;
        let lock_path = output_dir.join(LOCK_FILENAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false) // a waiting process may hold the same inode
            .open(&lock_path)
            .map_err(|e| StoreError::io(&lock_path, e))?;

        match try_lock_exclusive(&file) {
            Ok(true) => {}
            Ok(false) => return Err(StoreError::Locked { path: lock_path }),
            Err(err) => return Err(StoreError::io(&lock_path, err)),
        }

        // Pid of the holder, for humans only.
        let _ = file.set_len(0);
        let mut writer = &file;
        let _ = writeln!(writer, "{}", std::process::id());
        let _ = writer.flush();

        tracing::debug!(path = %lock_path.display(), "store lock acquired");
        Ok(StoreLock { lock_path, file })
    }

    /// Whether another holder has the lock right now. Never creates the file.
    pub fn is_held(output_dir: &Path) -> bool {
        let lock_path = output_dir.join(LOCK_FILENAME);
        let Ok(file) = File::open(&lock_path) else {
            return false;
        };
        match try_lock_exclusive(&file) {
            Ok(true) => {
                unlock(&file);
                false
            }
            Ok(false) => true,
            Err(_) => false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        // The file stays: removing it would let a new process lock a fresh
        // inode while a waiter still holds the unlinked one.
        unlock(&self.file);
    }
}

/// `Ok(false)` when someone else holds the lock.
#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    use std::os::unix::io::AsRawFd;
    // LOCK_EX = exclusive, LOCK_NB = fail instead of waiting
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(err)
    }
}

// Elsewhere the open handle is the only guard.
#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> std::io::Result<bool> {
    Ok(true)
}

fn unlock(file: &File) {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        unsafe {
            libc::flock(file.as_raw_fd(), libc::LOCK_UN);
        }
    }
    #[cfg(not(unix))]
    let _ = file;
}
