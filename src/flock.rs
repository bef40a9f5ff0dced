//! Advisory locking for the backing checkpoint files.
//!
//! The store takes an exclusive lock on every data file it opens read-write
//! so a second process cannot attach to the same checkpoint. Locks follow
//! the file handle: dropping the `File` releases them.

use std::fs::File;
use std::io;

/// Takes an exclusive, non-blocking advisory lock on an open file.
#[cfg(unix)]
pub fn lock_exclusive(file: &File) -> io::Result<()> {
    use libc::{flock, LOCK_EX, LOCK_NB};
    use std::os::unix::io::AsRawFd;

    let result = unsafe { flock(file.as_raw_fd(), LOCK_EX | LOCK_NB) };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Releases an advisory lock taken with [`lock_exclusive`].
#[cfg(unix)]
pub fn unlock(file: &File) -> io::Result<()> {
    use libc::{flock, LOCK_UN};
    use std::os::unix::io::AsRawFd;

    let result = unsafe { flock(file.as_raw_fd(), LOCK_UN) };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

// Fallback for platforms without flock. Allows compilation, at the cost of
// no cross-process exclusion.
#[cfg(not(unix))]
pub fn lock_exclusive(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
pub fn unlock(_file: &File) -> io::Result<()> {
    Ok(())
}
