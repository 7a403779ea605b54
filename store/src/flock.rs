//! POSIX advisory-lock veneer.
//!
//! Thin typed wrappers over `fcntl(2)` record locks. All locks are
//! exclusive (`F_WRLCK`); acquisition uses `F_SETLKW` and blocks until the
//! range is free. `EINTR` is retried internally.
//!
//! Advisory locks are per `(process, file)`: re-locking a range already
//! held by this process succeeds, and closing any descriptor for the file
//! drops every lock the process holds on it. In-process exclusion is the
//! caller's responsibility.
//!
//! This is the only module in the crate permitted `unsafe` code.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;

/// Apply one `fcntl` lock operation to `[start, start + len)`.
///
/// `len == 0` means "to the end of the file, however far it grows" per
/// POSIX, which is what the whole-file variants rely on.
fn lock_op(
    file: &File,
    cmd: libc::c_int,
    kind: libc::c_short,
    start: u64,
    len: u64,
) -> io::Result<()> {
    let start = i64::try_from(start)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "lock start beyond off_t"))?;
    let len = i64::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "lock length beyond off_t"))?;

    #[allow(clippy::cast_possible_truncation)]
    let fl = libc::flock {
        l_type: kind,
        l_whence: libc::SEEK_SET as libc::c_short,
        l_start: start,
        l_len: len,
        l_pid: 0,
    };

    loop {
        // SAFETY: `fl` is a valid, fully-initialized flock struct and the
        // descriptor is owned by `file` for the duration of the call.
        let rc = unsafe { libc::fcntl(file.as_raw_fd(), cmd, &fl as *const libc::flock) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Blocking exclusive lock on `[start, start + len)`.
///
/// # Errors
///
/// Returns the OS error if the lock cannot be acquired (other than `EINTR`,
/// which is retried).
#[allow(clippy::cast_possible_truncation)]
pub fn lock_range(file: &File, start: u64, len: u64) -> io::Result<()> {
    lock_op(file, libc::F_SETLKW, libc::F_WRLCK as libc::c_short, start, len)
}

/// Release a previously acquired lock on `[start, start + len)`.
///
/// Unlocking never blocks, so this uses `F_SETLK`.
///
/// # Errors
///
/// Returns the OS error on failure.
#[allow(clippy::cast_possible_truncation)]
pub fn unlock_range(file: &File, start: u64, len: u64) -> io::Result<()> {
    lock_op(file, libc::F_SETLK, libc::F_UNLCK as libc::c_short, start, len)
}

/// Blocking exclusive lock on the entire file, including future growth.
///
/// # Errors
///
/// Returns the OS error if the lock cannot be acquired.
pub fn lock_file(file: &File) -> io::Result<()> {
    lock_range(file, 0, 0)
}

/// Release a whole-file lock taken with [`lock_file`].
///
/// # Errors
///
/// Returns the OS error on failure.
pub fn unlock_file(file: &File) -> io::Result<()> {
    unlock_range(file, 0, 0)
}
