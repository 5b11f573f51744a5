//! Advisory file locks held for the duration of one I/O operation.
//!
//! Uses `flock(2)`, so the lock is tied to the open file description and is
//! released when the guard (or the process) goes away. Protects a single
//! append or read; the "batch is checked out" invariant lives in memory in
//! the storage reader instead.

use std::fs::File;

/// Lock mode for [`FileLock::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Readers share the file.
    Shared,
    /// One appender at a time.
    Exclusive,
}

/// Holds an advisory lock on a borrowed file until dropped.
pub struct FileLock<'a> {
    file: &'a File,
}

impl<'a> FileLock<'a> {
    /// Block until the lock is granted.
    #[cfg(unix)]
    pub fn acquire(file: &'a File, mode: LockMode) -> std::io::Result<Self> {
        use std::os::unix::io::AsRawFd;

        let operation = match mode {
            LockMode::Shared => libc::LOCK_SH,
            LockMode::Exclusive => libc::LOCK_EX,
        };

        loop {
            // SAFETY: the descriptor is valid for the lifetime of `file`.
            let result = unsafe { libc::flock(file.as_raw_fd(), operation) };
            if result == 0 {
                return Ok(FileLock { file });
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    #[cfg(not(unix))]
    pub fn acquire(file: &'a File, _mode: LockMode) -> std::io::Result<Self> {
        Ok(FileLock { file })
    }
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: the descriptor is still open, `file` outlives the guard.
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        #[cfg(not(unix))]
        let _ = self.file;
    }
}
