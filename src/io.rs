//! Positioned whole-buffer I/O with short-transfer retry accounting, plus
//! the platform calls the checkpoint store needs: hole punching, kernel
//! cache advice, and physical allocation queries.
//!
//! Short reads and writes are retried in place so a completed call is
//! equivalent to one sequential transfer at the requested offset; hard OS
//! errors are never retried. Platform-specific calls degrade to no-ops
//! where the host lacks them.

use std::fs::File;
use std::io;
use std::path::Path;

#[cfg(unix)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(buf, offset)
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(not(unix))]
fn write_at(mut file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::io::{Seek, SeekFrom, Write};
    file.seek(SeekFrom::Start(offset))?;
    file.write(buf)
}

#[cfg(not(unix))]
fn read_at(mut file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::io::{Read, Seek, SeekFrom};
    file.seek(SeekFrom::Start(offset))?;
    file.read(buf)
}

/// Writes the whole buffer at `offset`, retrying short writes and EINTR.
/// Returns how many retries it took.
pub fn write_all_at_counted(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<u64> {
    let mut retries = 0u64;
    while !buf.is_empty() {
        match write_at(file, buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "write returned zero bytes",
                ));
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
                if !buf.is_empty() {
                    retries += 1;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                retries += 1;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(retries)
}

/// Fills the whole buffer from `offset`, retrying short reads and EINTR.
/// Returns how many retries it took; end-of-file before the buffer is full
/// is an error.
pub fn read_full_at_counted(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<u64> {
    let mut retries = 0u64;
    while !buf.is_empty() {
        match read_at(file, buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "read reached end of file before filling the buffer",
                ));
            }
            Ok(n) => {
                let rest = buf;
                buf = &mut rest[n..];
                offset += n as u64;
                if !buf.is_empty() {
                    retries += 1;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                retries += 1;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(retries)
}

/// Asks the filesystem to deallocate `len` bytes at `offset` while keeping
/// the logical file size. A no-op on platforms without a punch-hole call.
#[cfg(target_os = "linux")]
pub fn punch_hole(file: &File, offset: u64, len: u64) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let mode = libc::FALLOC_FL_PUNCH_HOLE | libc::FALLOC_FL_KEEP_SIZE;
    let result = unsafe {
        libc::fallocate(
            file.as_raw_fd(),
            mode,
            offset as libc::off_t,
            len as libc::off_t,
        )
    };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn punch_hole(_file: &File, _offset: u64, _len: u64) -> io::Result<()> {
    Ok(())
}

/// The "don't need" kernel cache hint.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub const ADVICE_DONT_NEED: i32 = libc::POSIX_FADV_DONTNEED;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub const ADVICE_DONT_NEED: i32 = 0;

/// Forwards a `posix_fadvise` hint over the whole file and returns the raw
/// return code. Platforms without the call report success.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn fadvise(file: &File, advice: i32) -> i32 {
    use std::os::unix::io::AsRawFd;
    unsafe { libc::posix_fadvise(file.as_raw_fd(), 0, 0, advice) }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn fadvise(_file: &File, _advice: i32) -> i32 {
    0
}

/// Physical bytes the filesystem has allocated for the file. Falls back to
/// the logical size where block counts are unavailable.
#[cfg(unix)]
pub fn allocated_size(file: &File) -> io::Result<u64> {
    use std::os::unix::fs::MetadataExt;
    Ok(file.metadata()?.blocks() * 512)
}

#[cfg(not(unix))]
pub fn allocated_size(file: &File) -> io::Result<u64> {
    Ok(file.metadata()?.len())
}

/// I/O block size of the filesystem holding `path`.
#[cfg(unix)]
pub fn filesystem_block_size(path: &Path) -> io::Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
    let mut status: libc::statvfs = unsafe { std::mem::zeroed() };
    let result = unsafe { libc::statvfs(cpath.as_ptr(), &mut status) };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(status.f_bsize as u64)
}

#[cfg(not(unix))]
pub fn filesystem_block_size(_path: &Path) -> io::Result<u64> {
    // No statvfs equivalent wired up; report the common page size.
    Ok(4096)
}
