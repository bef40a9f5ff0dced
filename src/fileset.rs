//! The set of backing files behind one checkpoint store.
//!
//! A store owns `S` data files with the deterministic names
//! `gs_cp_<pgId>_<slot>.dat`. In split mode each slot lives in a directory
//! picked round-robin from the configured list; the single-file layout puts
//! one file in the base directory under the historical slot literal `1`.
//! Files opened read-write carry an exclusive advisory lock for the
//! lifetime of the handle.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::flock;
use crate::io;
use crate::layout;

/// How [`FileSet::open`] treats the files on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only; every file must exist; no lock is taken.
    CheckOnly,
    /// Read-write with an exclusive lock; every file must exist.
    OpenExisting,
    /// Read-write with an exclusive lock; absent files are created empty.
    CreateIfMissing,
}

pub struct FileSet {
    pg_id: u32,
    split_mode: bool,
    block_size: u64,
    io_warning_threshold: Duration,
    /// Directory per slot; single-entry for the non-split layout.
    dirs: Vec<PathBuf>,
    /// Full file path per slot.
    paths: Vec<PathBuf>,
    files: Vec<Option<File>>,
}

impl FileSet {
    /// Assembles the slot directories and file names. The configuration is
    /// assumed validated; no filesystem access happens here.
    pub fn new(
        pg_id: u32,
        block_size: u64,
        base_dir: &Path,
        split_count: u32,
        dir_list: &[PathBuf],
        io_warning_threshold: Duration,
    ) -> Self {
        let split_mode = split_count > 0;
        let slots = split_count.max(1) as usize;

        let mut dirs = Vec::with_capacity(slots);
        let mut paths = Vec::with_capacity(slots);
        for slot in 0..slots {
            let dir = if split_mode {
                dir_list[slot % dir_list.len()].clone()
            } else {
                base_dir.to_path_buf()
            };
            // The non-split layout keeps the historical slot literal 1 so
            // existing files stay recognizable.
            let name_slot = if split_mode { slot as i32 } else { 1 };
            paths.push(dir.join(layout::file_name(pg_id, name_slot)));
            dirs.push(dir);
        }

        Self {
            pg_id,
            split_mode,
            block_size,
            io_warning_threshold,
            dirs,
            paths,
            files: (0..slots).map(|_| None).collect(),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Full path of one slot's file.
    pub fn path(&self, slot: usize) -> &Path {
        &self.paths[slot]
    }

    /// Path of the primary file, used in summary diagnostics.
    pub fn primary_path(&self) -> &Path {
        &self.paths[0]
    }

    /// Opens every slot, returning the total block count found on disk
    /// (`ceil(size / block_size)` summed over the files). On failure every
    /// file opened so far is closed and unlocked before the error surfaces.
    pub fn open(&mut self, mode: OpenMode) -> Result<u64> {
        match self.open_all(mode) {
            Ok(total) => Ok(total),
            Err(err) => {
                self.close();
                Err(err)
            }
        }
    }

    fn open_all(&mut self, mode: OpenMode) -> Result<u64> {
        let mut total = 0u64;
        for slot in 0..self.len() {
            self.files[slot] = None;
            self.check_dir(slot)?;

            let path = &self.paths[slot];
            if path.exists() {
                let file = OpenOptions::new()
                    .read(true)
                    .write(mode != OpenMode::CheckOnly)
                    .open(path)
                    .map_err(|err| open_error(err, path, self.pg_id))?;
                if mode != OpenMode::CheckOnly {
                    flock::lock_exclusive(&file)
                        .map_err(|err| lock_error(err, path, self.pg_id))?;
                }
                let size = file
                    .metadata()
                    .map_err(|err| open_error(err, path, self.pg_id))?
                    .len();
                total += size.div_ceil(self.block_size);
                self.files[slot] = Some(file);
            } else {
                if mode != OpenMode::CreateIfMissing {
                    return Err(Error::FileNotFound(format!(
                        "checkpoint file not found: {} (pgId={})",
                        path.display(),
                        self.pg_id
                    )));
                }
                let file = OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .truncate(false)
                    .open(path)
                    .map_err(|err| open_error(err, path, self.pg_id))?;
                flock::lock_exclusive(&file).map_err(|err| lock_error(err, path, self.pg_id))?;
                self.files[slot] = Some(file);
            }
        }
        Ok(total)
    }

    fn check_dir(&self, slot: usize) -> Result<()> {
        let dir = &self.dirs[slot];
        if !self.split_mode && dir.as_os_str().is_empty() {
            return Ok(());
        }
        if !dir.exists() {
            return Err(Error::InvalidDirectory(format!(
                "directory not found: {}",
                dir.display()
            )));
        }
        if !dir.is_dir() {
            return Err(Error::InvalidDirectory(format!(
                "path exists but is not a directory: {}",
                dir.display()
            )));
        }
        Ok(())
    }

    /// Recreates every backing file empty and re-takes the locks.
    pub fn truncate(&mut self) -> Result<()> {
        for slot in 0..self.len() {
            // Dropping the old handle releases its lock before the recreate.
            self.files[slot] = None;
            let path = &self.paths[slot];
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(true)
                .open(path)
                .map_err(|err| open_error(err, path, self.pg_id))?;
            flock::lock_exclusive(&file).map_err(|err| lock_error(err, path, self.pg_id))?;
            tracing::warn!(file = %path.display(), pg_id = self.pg_id, "checkpoint file truncated");
            self.files[slot] = Some(file);
        }
        Ok(())
    }

    /// Closes every file, releasing locks. Idempotent.
    pub fn close(&mut self) {
        for file in &mut self.files {
            *file = None;
        }
    }

    /// Whether a slot currently holds an open handle.
    pub fn is_open(&self, slot: usize) -> bool {
        self.files[slot].is_some()
    }

    /// Issues a durability sync on every open file. Long syncs are reported
    /// but only hard errors fail the call.
    pub fn flush(&mut self) -> Result<()> {
        for slot in 0..self.len() {
            if let Some(file) = &self.files[slot] {
                let start = Instant::now();
                file.sync_all().map_err(|err| {
                    Error::Io(format!(
                        "checkpoint file sync failed: {err} (file={}, pgId={})",
                        self.paths[slot].display(),
                        self.pg_id
                    ))
                })?;
                self.report_io("sync", slot, 0, 0, start.elapsed(), 0);
            }
        }
        Ok(())
    }

    /// Forwards a kernel cache advice value to every open file. Unsupported
    /// platforms ignore it.
    pub fn advise(&mut self, advice: i32) {
        for slot in 0..self.len() {
            if let Some(file) = &self.files[slot] {
                let rc = io::fadvise(file, advice);
                if rc > 0 {
                    tracing::warn!(
                        file = %self.paths[slot].display(),
                        pg_id = self.pg_id,
                        advice,
                        return_code = rc,
                        "fadvise failed"
                    );
                } else {
                    tracing::debug!(
                        file = %self.paths[slot].display(),
                        pg_id = self.pg_id,
                        advice,
                        "cache advice forwarded"
                    );
                }
            }
        }
    }

    /// Writes the whole buffer at `offset` in the slot's file, creating and
    /// locking the file first if it is not open. Returns the short-write
    /// retry count.
    pub fn write_at(&mut self, slot: usize, buf: &[u8], offset: u64) -> Result<u64> {
        self.ensure_open_rw(slot)?;
        let start = Instant::now();
        let file = self.slot_file(slot)?;
        let retries = io::write_all_at_counted(file, buf, offset).map_err(|err| {
            Error::Io(format!(
                "checkpoint file write failed: {err} (file={}, pgId={}, offset={offset}, size={})",
                self.paths[slot].display(),
                self.pg_id,
                buf.len()
            ))
        })?;
        self.report_io("write", slot, offset, buf.len() as u64, start.elapsed(), retries);
        Ok(retries)
    }

    /// Fills the whole buffer from `offset` in the slot's file, reopening it
    /// if closed. Returns `None` when the file is genuinely absent on disk
    /// (dropped between checkpoints), otherwise the retry count.
    pub fn read_at(&mut self, slot: usize, buf: &mut [u8], offset: u64) -> Result<Option<u64>> {
        if !self.ensure_open_existing(slot)? {
            return Ok(None);
        }
        let start = Instant::now();
        let file = self.slot_file(slot)?;
        let retries = io::read_full_at_counted(file, buf, offset).map_err(|err| {
            Error::Io(format!(
                "checkpoint file read failed: {err} (file={}, pgId={}, offset={offset}, size={})",
                self.paths[slot].display(),
                self.pg_id,
                buf.len()
            ))
        })?;
        self.report_io("read", slot, offset, buf.len() as u64, start.elapsed(), retries);
        Ok(Some(retries))
    }

    /// Punches a hole in the slot's file. Closed slots and zero sizes are
    /// skipped; returns whether a punch was issued.
    pub fn punch_hole(&mut self, slot: usize, offset: u64, len: u64) -> Result<bool> {
        if len == 0 || self.files[slot].is_none() {
            return Ok(false);
        }
        let start = Instant::now();
        let file = self.slot_file(slot)?;
        io::punch_hole(file, offset, len).map_err(|err| {
            Error::Io(format!(
                "checkpoint file hole punch failed: {err} (file={}, pgId={}, offset={offset}, size={len})",
                self.paths[slot].display(),
                self.pg_id
            ))
        })?;
        self.report_io("punch_hole", slot, offset, len, start.elapsed(), 0);
        Ok(true)
    }

    /// Summed logical size of the open files.
    pub fn total_size(&self) -> Result<u64> {
        let mut total = 0u64;
        for file in self.files.iter().flatten() {
            total += file.metadata().map_err(Error::from)?.len();
        }
        Ok(total)
    }

    /// Logical size of one slot's file; 0 when closed.
    pub fn slot_size(&self, slot: usize) -> Result<u64> {
        match &self.files[slot] {
            Some(file) => Ok(file.metadata().map_err(Error::from)?.len()),
            None => Ok(0),
        }
    }

    /// Summed physical allocation of the open files.
    pub fn allocated_size(&self) -> Result<u64> {
        let mut total = 0u64;
        for file in self.files.iter().flatten() {
            total += io::allocated_size(file).map_err(Error::from)?;
        }
        Ok(total)
    }

    fn slot_file(&self, slot: usize) -> Result<&File> {
        self.files[slot].as_ref().ok_or_else(|| {
            Error::Io(format!(
                "checkpoint file is closed: {}",
                self.paths[slot].display()
            ))
        })
    }

    // Write paths treat a closed handle as soft state: create and lock.
    fn ensure_open_rw(&mut self, slot: usize) -> Result<()> {
        if self.files[slot].is_some() {
            return Ok(());
        }
        let path = &self.paths[slot];
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|err| open_error(err, path, self.pg_id))?;
        flock::lock_exclusive(&file).map_err(|err| lock_error(err, path, self.pg_id))?;
        self.files[slot] = Some(file);
        Ok(())
    }

    // Read paths reopen only what exists; absence means "no data".
    fn ensure_open_existing(&mut self, slot: usize) -> Result<bool> {
        if self.files[slot].is_some() {
            return Ok(true);
        }
        let path = &self.paths[slot];
        if !path.exists() {
            return Ok(false);
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| open_error(err, path, self.pg_id))?;
        flock::lock_exclusive(&file).map_err(|err| lock_error(err, path, self.pg_id))?;
        self.files[slot] = Some(file);
        Ok(true)
    }

    fn report_io(
        &self,
        kind: &'static str,
        slot: usize,
        offset: u64,
        size: u64,
        elapsed: Duration,
        retries: u64,
    ) {
        if elapsed > self.io_warning_threshold {
            tracing::warn!(
                kind,
                file = %self.paths[slot].display(),
                pg_id = self.pg_id,
                offset,
                size,
                duration_ms = elapsed.as_millis() as u64,
                retries,
                "long checkpoint I/O"
            );
        } else {
            tracing::trace!(
                kind,
                file = %self.paths[slot].display(),
                pg_id = self.pg_id,
                offset,
                size,
                duration_ms = elapsed.as_millis() as u64,
                retries,
                "checkpoint I/O"
            );
        }
    }
}

fn open_error(err: std::io::Error, path: &Path, pg_id: u32) -> Error {
    Error::Io(format!(
        "checkpoint file open failed: {err} (file={}, pgId={pg_id})",
        path.display()
    ))
}

fn lock_error(err: std::io::Error, path: &Path, pg_id: u32) -> Error {
    Error::Io(format!(
        "checkpoint file lock failed: {err} (file={}, pgId={pg_id})",
        path.display()
    ))
}
