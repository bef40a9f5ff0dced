//! The checkpoint file store: a flat array of fixed-size blocks over the
//! striped backing files, with allocation bookkeeping.
//!
//! Two parallel bitmaps track every block. `used` is the allocation state;
//! `valid` marks membership in the most recent completed checkpoint. The
//! distinction matters: a block can be allocated but not yet part of a
//! consistent snapshot, and the checkpoint protocol flips `valid` bits
//! without freeing anything. Neither bitmap is persisted here; callers
//! rebuild them from their own metadata after `open`.
//!
//! Allocation scans `used` from a rotating cursor for at most
//! [`SEARCH_LIMIT`] positions (with one wrap-around window under the same
//! cap) and appends a fresh block on a miss. The cap keeps allocation
//! amortized O(1) on fragmented stores; the file may grow slightly past the
//! minimum and the slack is reclaimed by hole punching.

use std::path::Path;
use std::time::Instant;

use crate::bitmap::Bitmap;
use crate::config::CheckpointConfig;
use crate::error::Result;
use crate::errparam;
use crate::fileset::{FileSet, OpenMode};
use crate::io;
use crate::layout::BlockLayout;

/// Longest run of used bits one allocation is willing to scan past.
pub const SEARCH_LIMIT: u32 = 1024;

pub struct CheckpointFile {
    layout: BlockLayout,
    files: FileSet,
    pg_id: u32,
    block_exp: u8,
    base_dir: std::path::PathBuf,

    used: Bitmap,
    valid: Bitmap,
    /// Highest written block bound; grows with writes, reset by truncate.
    block_count: u64,
    /// Count of false bits in `used`.
    free_count: u64,
    /// Rotating free-block search position.
    cursor: u64,

    read_blocks: u64,
    written_blocks: u64,
    read_retries: u64,
    write_retries: u64,
}

impl CheckpointFile {
    /// Validates the configuration and assembles the store. No filesystem
    /// access happens until [`open`](Self::open).
    pub fn new(config: CheckpointConfig) -> Result<Self> {
        config.validate()?;
        let layout = BlockLayout::new(
            config.block_exp_size,
            config.split_count,
            config.stripe_size,
        );
        let files = FileSet::new(
            config.pg_id,
            layout.block_size(),
            &config.dir,
            config.split_count,
            &config.dir_list,
            config.io_warning_threshold,
        );
        Ok(Self {
            layout,
            files,
            pg_id: config.pg_id,
            block_exp: config.block_exp_size,
            base_dir: config.dir,
            used: Bitmap::with_capacity(10240),
            valid: Bitmap::with_capacity(10240),
            block_count: 0,
            free_count: 0,
            cursor: 0,
            read_blocks: 0,
            written_blocks: 0,
            read_retries: 0,
            write_retries: 0,
        })
    }

    /// Opens or creates the backing files, recovering `block_count` from
    /// their sizes. Both bitmaps are rebuilt to `block_count` free bits;
    /// real allocation state is the caller's to restore via
    /// [`initialize_used`](Self::initialize_used) and bulk
    /// [`set_used`](Self::set_used) / [`set_valid`](Self::set_valid) calls.
    ///
    /// Returns whether the store is freshly empty.
    pub fn open(&mut self, mode: OpenMode) -> Result<bool> {
        let total = self.files.open(mode)?;
        self.block_count = total;
        self.initialize_used();
        self.initialize_valid();
        self.cursor = 0;
        Ok(total == 0)
    }

    /// Recreates every backing file empty and resets the in-memory state.
    /// The retry counters survive; everything else returns to zero.
    pub fn truncate(&mut self) -> Result<()> {
        self.files.truncate()?;
        self.block_count = 0;
        self.free_count = 0;
        self.cursor = 0;
        self.used.clear();
        self.valid.clear();
        self.read_blocks = 0;
        self.written_blocks = 0;
        Ok(())
    }

    /// Closes every backing file, releasing locks. Idempotent.
    pub fn close(&mut self) {
        self.files.close();
    }

    /// Syncs every open backing file.
    pub fn flush(&mut self) -> Result<()> {
        self.files.flush()
    }

    /// Forwards a kernel cache advice value (nominally
    /// [`io::ADVICE_DONT_NEED`]) to every open backing file.
    pub fn advise(&mut self, advice: i32) {
        self.files.advise(advice)
    }

    // ---------------------------------------------------------------------
    // Allocator
    // ---------------------------------------------------------------------

    /// Hands out a free block number, marking it used.
    ///
    /// Scans `used` from the cursor for at most [`SEARCH_LIMIT`] positions,
    /// wrapping once under the same cap; on a miss (or when nothing is
    /// free) a fresh block is appended and its valid bit cleared.
    pub fn allocate(&mut self) -> u64 {
        let mut allocate_pos = None;
        let size = self.used.len();

        if self.free_count > 0 {
            let start = self.cursor;
            let mut count: u32 = 0;
            let mut pos = start;
            while pos < size {
                if !self.used.get(pos) {
                    allocate_pos = Some(pos);
                    break;
                }
                if count > SEARCH_LIMIT {
                    break;
                }
                pos += 1;
                count += 1;
            }
            if allocate_pos.is_none() && count <= SEARCH_LIMIT {
                pos = 0;
                while pos < start {
                    if !self.used.get(pos) {
                        allocate_pos = Some(pos);
                        break;
                    }
                    if count > SEARCH_LIMIT {
                        break;
                    }
                    pos += 1;
                    count += 1;
                }
            }
            self.cursor = pos + 1;
            if self.cursor >= size {
                self.cursor = 0;
            }
        }

        let block_no = match allocate_pos {
            Some(pos) => {
                tracing::debug!(block = pos, pg_id = self.pg_id, "block reused");
                pos
            }
            None => {
                let pos = self.used.append(true);
                self.valid.set(pos, false);
                tracing::debug!(block = pos, pg_id = self.pg_id, "block appended");
                pos
            }
        };
        self.set_used(block_no, true);
        block_no
    }

    /// Returns an allocated block to the free pool. The valid bit is left
    /// for the checkpoint protocol to manage.
    pub fn free(&mut self, block_no: u64) {
        debug_assert!(self.used.get(block_no));
        self.set_used(block_no, false);
        tracing::debug!(block = block_no, pg_id = self.pg_id, "block freed");
    }

    /// Directly sets one used bit, keeping `free_count` consistent. Bits
    /// materialized by growing the map count as free until set otherwise.
    pub fn set_used(&mut self, block_no: u64, flag: bool) {
        let old_len = self.used.len();
        let old = self.used.get(block_no);
        self.used.set(block_no, flag);
        if block_no >= old_len {
            self.free_count += self.used.len() - old_len;
        }
        if flag && !old {
            debug_assert!(self.free_count > 0);
            self.free_count -= 1;
        } else if !flag && old {
            self.free_count += 1;
        }
        debug_assert!(self.free_count <= self.used.len());
    }

    pub fn get_used(&self, block_no: u64) -> bool {
        self.used.get(block_no)
    }

    /// Resets `used` to `block_count` free bits, for callers rebuilding the
    /// allocation state from external metadata.
    pub fn initialize_used(&mut self) {
        self.used.clear();
        self.used.reserve(self.block_count);
        for _ in 0..self.block_count {
            self.used.append(false);
        }
        self.free_count = self.block_count;
    }

    // ---------------------------------------------------------------------
    // Valid-set tracker
    // ---------------------------------------------------------------------

    /// Marks one block's membership in the most recent checkpoint.
    pub fn set_valid(&mut self, block_no: u64, flag: bool) {
        self.valid.set(block_no, flag);
    }

    pub fn get_valid(&self, block_no: u64) -> bool {
        self.valid.get(block_no)
    }

    /// Resets `valid` to `block_count` clear bits.
    pub fn initialize_valid(&mut self) {
        self.valid.clear();
        self.valid.reserve(self.block_count);
        for _ in 0..self.block_count {
            self.valid.append(false);
        }
    }

    // ---------------------------------------------------------------------
    // Block I/O
    // ---------------------------------------------------------------------

    /// Writes `n_blocks` whole blocks from `buffer` at `block_no`, raising
    /// `block_count` when the write extends the store. Returns `n_blocks`.
    pub fn write_block(&mut self, buffer: &[u8], n_blocks: u32, block_no: u64) -> Result<u32> {
        debug_assert!(n_blocks != 0);
        let len = u64::from(n_blocks) << self.block_exp;
        let offset = block_no << self.block_exp;
        let slot = self.layout.file_index(offset);
        let file_offset = self.layout.file_offset(offset);

        let retries = self
            .files
            .write_at(slot, &buffer[..len as usize], file_offset)?;
        self.write_retries += retries;

        if self.block_count < block_no + u64::from(n_blocks) {
            self.block_count = block_no + u64::from(n_blocks);
            tracing::debug!(
                file = %self.files.path(slot).display(),
                block_count = self.block_count,
                "checkpoint file extended"
            );
        }
        self.written_blocks += u64::from(n_blocks);
        tracing::trace!(
            file = %self.files.path(slot).display(),
            block = block_no,
            written_blocks = self.written_blocks,
            "block written"
        );
        Ok(n_blocks)
    }

    /// Writes an arbitrary byte range, for sub-block metadata. Raises
    /// `block_count` to cover the last touched block. Returns the byte
    /// count written.
    pub fn write_partial_block(&mut self, buffer: &[u8], offset: u64) -> Result<u64> {
        let slot = self.layout.file_index(offset);
        let file_offset = self.layout.file_offset(offset);

        let retries = self.files.write_at(slot, buffer, file_offset)?;
        self.write_retries += retries;

        let end = offset + buffer.len() as u64;
        if (self.block_count << self.block_exp) < end {
            self.block_count = end.div_ceil(self.block_size());
            tracing::debug!(
                file = %self.files.path(slot).display(),
                block_count = self.block_count,
                "checkpoint file extended"
            );
        }
        Ok(buffer.len() as u64)
    }

    /// Reads `n_blocks` whole blocks at `block_no` into `buffer`. Returns
    /// `n_blocks`, or 0 when the backing file is absent on disk (possible
    /// under split mode after a file was dropped between checkpoints).
    pub fn read_block(&mut self, buffer: &mut [u8], n_blocks: u32, block_no: u64) -> Result<u32> {
        if n_blocks == 0 || block_no + u64::from(n_blocks) > self.block_count {
            return errparam!(
                "checkpoint file read rejected: nBlocks={n_blocks}, blockNo={block_no}, \
                 blockCount={} (pgId={})",
                self.block_count,
                self.pg_id
            );
        }
        let len = u64::from(n_blocks) << self.block_exp;
        let offset = block_no << self.block_exp;
        let slot = self.layout.file_index(offset);
        let file_offset = self.layout.file_offset(offset);

        match self
            .files
            .read_at(slot, &mut buffer[..len as usize], file_offset)?
        {
            None => Ok(0),
            Some(retries) => {
                self.read_retries += retries;
                self.read_blocks += u64::from(n_blocks);
                tracing::trace!(
                    file = %self.files.path(slot).display(),
                    block = block_no,
                    read_blocks = self.read_blocks,
                    "block read"
                );
                Ok(n_blocks)
            }
        }
    }

    /// Asks the filesystem to deallocate `size` bytes at logical byte
    /// `offset`, keeping the logical file size. A no-op where unsupported
    /// or when the mapped file is closed.
    pub fn punch_hole_block(&mut self, size: u64, offset: u64) -> Result<()> {
        let slot = self.layout.file_index(offset);
        let file_offset = self.layout.file_offset(offset);
        self.files.punch_hole(slot, file_offset, size)?;
        Ok(())
    }

    /// Punches one hole per free block, skipping block 0 (the conventional
    /// header block). Returns how many punches were issued.
    pub fn zerofill_unused_blocks(&mut self) -> Result<u64> {
        let start = Instant::now();
        let total = self.used.len();
        let mut punched = 0u64;
        for block in 1..total {
            if !self.used.get(block) {
                let offset = block << self.block_exp;
                let slot = self.layout.file_index(offset);
                let file_offset = self.layout.file_offset(offset);
                if self.files.punch_hole(slot, file_offset, self.block_size())? {
                    punched += 1;
                }
            }
        }
        tracing::info!(
            file = %self.files.primary_path().display(),
            pg_id = self.pg_id,
            hole_punch_count = punched,
            total_block_count = total,
            duration_ms = start.elapsed().as_millis() as u64,
            "unused checkpoint blocks punched"
        );
        Ok(punched)
    }

    // ---------------------------------------------------------------------
    // Sizes and counters
    // ---------------------------------------------------------------------

    pub fn block_size(&self) -> u64 {
        self.layout.block_size()
    }

    /// Number of blocks the store logically holds.
    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Number of free bits in the used map.
    pub fn free_block_count(&self) -> u64 {
        self.free_count
    }

    /// Summed logical size of the open backing files.
    pub fn file_size(&self) -> Result<u64> {
        self.files.total_size()
    }

    /// Logical size of one split slot's file; 0 when closed.
    pub fn split_file_size(&self, split_id: u32) -> Result<u64> {
        self.files.slot_size(split_id as usize)
    }

    /// Physical bytes the filesystem has allocated across the open files;
    /// 0 for an unwritten store.
    pub fn allocated_file_size(&self) -> Result<u64> {
        if self.block_count == 0 {
            return Ok(0);
        }
        self.files.allocated_size()
    }

    /// I/O block size of the filesystem under a directory.
    pub fn filesystem_block_size_of(dir: &Path) -> Result<u64> {
        Ok(io::filesystem_block_size(dir)?)
    }

    /// I/O block size of the filesystem under the base directory.
    pub fn filesystem_block_size(&self) -> Result<u64> {
        Self::filesystem_block_size_of(&self.base_dir)
    }

    pub fn read_block_count(&self) -> u64 {
        self.read_blocks
    }

    pub fn write_block_count(&self) -> u64 {
        self.written_blocks
    }

    pub fn read_retry_count(&self) -> u64 {
        self.read_retries
    }

    pub fn write_retry_count(&self) -> u64 {
        self.write_retries
    }

    pub fn reset_read_block_count(&mut self) {
        self.read_blocks = 0;
    }

    pub fn reset_write_block_count(&mut self) {
        self.written_blocks = 0;
    }

    pub fn reset_read_retry_count(&mut self) {
        self.read_retries = 0;
    }

    pub fn reset_write_retry_count(&mut self) {
        self.write_retries = 0;
    }

    // ---------------------------------------------------------------------
    // Diagnostics
    // ---------------------------------------------------------------------

    /// Primary file name, for log context.
    pub fn dump(&self) -> String {
        self.files.primary_path().display().to_string()
    }

    /// Hex rendering of the used map.
    pub fn dump_used(&self) -> String {
        self.used.dump_hex()
    }

    /// Hex rendering of the valid map.
    pub fn dump_valid(&self) -> String {
        self.valid.dump_hex()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use proptest::prelude::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn store(dir: &Path, block_exp: u8) -> CheckpointFile {
        CheckpointFile::new(CheckpointConfig::new(block_exp, dir))
            .expect("Failed to build store")
    }

    fn split_store(block_exp: u8, stripe: u32, dirs: Vec<PathBuf>) -> CheckpointFile {
        let config = CheckpointConfig::new(block_exp, ".")
            .split_count(dirs.len() as u32)
            .stripe_size(stripe)
            .dir_list(dirs);
        CheckpointFile::new(config).expect("Failed to build split store")
    }

    fn block_of(store: &CheckpointFile, fill: u8) -> Vec<u8> {
        vec![fill; store.block_size() as usize]
    }

    #[test]
    fn test_fresh_store_allocate_free_reuse() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut store = store(dir.path(), 16);

        let fresh = store.open(OpenMode::CreateIfMissing).expect("Failed to open");
        assert!(fresh);
        assert_eq!(store.allocate(), 0);
        assert_eq!(store.allocate(), 1);
        store.free(0);
        assert_eq!(store.allocate(), 0);
        assert!(dir.path().join("gs_cp_0_1.dat").exists());
    }

    #[test]
    fn test_allocate_on_empty_appends_at_zero() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut store = store(dir.path(), 12);
        store.open(OpenMode::CreateIfMissing).expect("Failed to open");

        assert_eq!(store.allocate(), 0);
        assert!(store.get_used(0));
        assert!(!store.get_valid(0));
    }

    #[test]
    fn test_allocate_tracks_free_count() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut store = store(dir.path(), 12);
        store.open(OpenMode::CreateIfMissing).expect("Failed to open");

        for i in 0..10 {
            assert_eq!(store.allocate(), i);
        }
        assert_eq!(store.free_block_count(), 0);

        store.free(3);
        store.free(7);
        assert_eq!(store.free_block_count(), 2);

        // Both come back before anything is appended.
        let a = store.allocate();
        let b = store.allocate();
        assert!(a == 3 || a == 7);
        assert!(b == 3 || b == 7);
        assert_ne!(a, b);
        assert_eq!(store.free_block_count(), 0);
    }

    #[test]
    fn test_search_limit_falls_through_to_append() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut store = store(dir.path(), 12);
        store.open(OpenMode::CreateIfMissing).expect("Failed to open");

        // 2000 used bits, one free bit at 2000, cursor at 0. The free bit
        // sits past the scan cap, so allocation appends instead.
        for i in 0..2000 {
            store.set_used(i, true);
        }
        store.set_used(2000, true);
        store.set_used(2000, false);
        assert_eq!(store.free_block_count(), 1);

        assert_eq!(store.allocate(), 2001);
        assert!(store.get_used(2001));
        // The skipped free bit is still free.
        assert!(!store.get_used(2000));
    }

    #[test]
    fn test_free_bit_within_search_window_is_reused() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut store = store(dir.path(), 12);
        store.open(OpenMode::CreateIfMissing).expect("Failed to open");

        for i in 0..100 {
            store.set_used(i, true);
        }
        store.set_used(50, false);
        assert_eq!(store.allocate(), 50);
    }

    #[test]
    fn test_cursor_wraps_to_reuse_earlier_blocks() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut store = store(dir.path(), 12);
        store.open(OpenMode::CreateIfMissing).expect("Failed to open");

        for _ in 0..10 {
            store.allocate();
        }
        store.free(5);
        // Reusing block 5 leaves the cursor at 6.
        assert_eq!(store.allocate(), 5);
        store.free(2);
        // Block 2 sits behind the cursor; only the wrap-around window finds it.
        assert_eq!(store.allocate(), 2);
    }

    #[test]
    fn test_set_used_grows_and_counts_free_bits() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut store = store(dir.path(), 12);
        store.open(OpenMode::CreateIfMissing).expect("Failed to open");

        store.set_used(5, true);
        // Bits 0..5 were materialized free.
        assert_eq!(store.free_block_count(), 5);
        assert!(store.get_used(5));

        store.set_used(5, true); // no flip, no change
        assert_eq!(store.free_block_count(), 5);

        store.set_used(5, false);
        assert_eq!(store.free_block_count(), 6);
    }

    #[test]
    fn test_valid_bits_independent_of_free() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut store = store(dir.path(), 12);
        store.open(OpenMode::CreateIfMissing).expect("Failed to open");

        let block = store.allocate();
        store.set_valid(block, true);
        store.free(block);
        // Freeing must not clear checkpoint membership.
        assert!(store.get_valid(block));
        assert!(!store.get_used(block));
    }

    #[test]
    fn test_initialize_rebuilds_maps() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut store = store(dir.path(), 12);
        store.open(OpenMode::CreateIfMissing).expect("Failed to open");

        let data = block_of(&store, 1);
        store.write_block(&data, 1, 0).expect("Failed to write");
        store.write_block(&data, 1, 1).expect("Failed to write");
        assert_eq!(store.block_count(), 2);

        store.initialize_used();
        store.initialize_valid();
        assert_eq!(store.free_block_count(), 2);
        assert!(!store.get_used(0));
        assert!(!store.get_valid(1));

        store.set_used(0, true);
        store.set_used(1, true);
        assert_eq!(store.free_block_count(), 0);
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut store = store(dir.path(), 12);
        store.open(OpenMode::CreateIfMissing).expect("Failed to open");

        let data: Vec<u8> = (0..store.block_size() * 3)
            .map(|i| (i % 251) as u8)
            .collect();
        assert_eq!(store.write_block(&data, 3, 2).expect("write failed"), 3);
        assert_eq!(store.block_count(), 5);

        let mut out = vec![0u8; data.len()];
        assert_eq!(store.read_block(&mut out, 3, 2).expect("read failed"), 3);
        assert_eq!(out, data);

        assert_eq!(store.write_block_count(), 3);
        assert_eq!(store.read_block_count(), 3);
    }

    #[test]
    fn test_read_validation() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut store = store(dir.path(), 12);
        store.open(OpenMode::CreateIfMissing).expect("Failed to open");

        let mut out = block_of(&store, 0);
        // Empty store: even block 0 is out of range.
        assert!(matches!(
            store.read_block(&mut out, 1, 0),
            Err(Error::InvalidParameter(_))
        ));

        let data = block_of(&store, 9);
        store.write_block(&data, 1, 0).expect("write failed");
        assert_eq!(store.read_block(&mut out, 1, 0).expect("read failed"), 1);

        assert!(matches!(
            store.read_block(&mut out, 0, 0),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            store.read_block(&mut out, 1, 1),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_write_partial_block_extends_block_count() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut store = store(dir.path(), 12);
        store.open(OpenMode::CreateIfMissing).expect("Failed to open");

        let written = store
            .write_partial_block(b"header", 4096 + 10)
            .expect("write failed");
        assert_eq!(written, 6);
        // Bytes 4106..4112 land in block 1, so the store covers 2 blocks.
        assert_eq!(store.block_count(), 2);

        // A partial write inside the covered range leaves the count alone.
        store
            .write_partial_block(b"x", 0)
            .expect("write failed");
        assert_eq!(store.block_count(), 2);
    }

    #[test]
    fn test_split_store_stripes_across_files() {
        let dir_a = tempdir().expect("Failed to create temp dir");
        let dir_b = tempdir().expect("Failed to create temp dir");
        let mut store = split_store(
            12,
            4,
            vec![dir_a.path().to_path_buf(), dir_b.path().to_path_buf()],
        );
        store.open(OpenMode::CreateIfMissing).expect("Failed to open");

        // One write per block; blocks 0-3 go to file 0, 4-7 to file 1.
        for block in 0..8u64 {
            let data = block_of(&store, block as u8 + 1);
            store.write_block(&data, 1, block).expect("write failed");
        }
        assert_eq!(store.split_file_size(0).unwrap(), 4 * 4096);
        assert_eq!(store.split_file_size(1).unwrap(), 4 * 4096);

        // Block 8 wraps back to file 0 at local offset 4*4096.
        let data = block_of(&store, 0xAB);
        store.write_block(&data, 1, 8).expect("write failed");
        assert_eq!(store.split_file_size(0).unwrap(), 5 * 4096);

        let mut out = block_of(&store, 0);
        store.read_block(&mut out, 1, 8).expect("read failed");
        assert_eq!(out, data);
    }

    #[test]
    fn test_split_read_missing_file_returns_zero() {
        let dir_a = tempdir().expect("Failed to create temp dir");
        let dir_b = tempdir().expect("Failed to create temp dir");
        let mut store = split_store(
            12,
            4,
            vec![dir_a.path().to_path_buf(), dir_b.path().to_path_buf()],
        );
        store.open(OpenMode::CreateIfMissing).expect("Failed to open");

        for block in 0..8u64 {
            let data = block_of(&store, 7);
            store.write_block(&data, 1, block).expect("write failed");
        }
        store.close();
        std::fs::remove_file(dir_b.path().join("gs_cp_0_1.dat")).expect("Failed to remove");

        let mut out = block_of(&store, 0);
        // Block 5 lived in the dropped file: "no data".
        assert_eq!(store.read_block(&mut out, 1, 5).expect("read failed"), 0);
        // Block 1 lazily reopens the surviving file.
        assert_eq!(store.read_block(&mut out, 1, 1).expect("read failed"), 1);
    }

    #[test]
    fn test_split_write_recreates_missing_file() {
        let dir_a = tempdir().expect("Failed to create temp dir");
        let dir_b = tempdir().expect("Failed to create temp dir");
        let mut store = split_store(
            12,
            4,
            vec![dir_a.path().to_path_buf(), dir_b.path().to_path_buf()],
        );
        store.open(OpenMode::CreateIfMissing).expect("Failed to open");
        store.close();
        std::fs::remove_file(dir_b.path().join("gs_cp_0_1.dat")).expect("Failed to remove");

        let data = block_of(&store, 3);
        store.write_block(&data, 1, 4).expect("write failed");
        assert!(dir_b.path().join("gs_cp_0_1.dat").exists());
    }

    #[test]
    fn test_zerofill_punches_only_free_blocks_after_zero() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut store = store(dir.path(), 12);
        store.open(OpenMode::CreateIfMissing).expect("Failed to open");

        for block in 0..4u64 {
            assert_eq!(store.allocate(), block);
            let data = block_of(&store, block as u8 + 1);
            store.write_block(&data, 1, block).expect("write failed");
        }
        store.free(1);
        store.free(3);

        let punched = store.zerofill_unused_blocks().expect("zerofill failed");
        assert_eq!(punched, 2);
        // Logical size is untouched by hole punching.
        assert_eq!(store.file_size().unwrap(), 4 * 4096);

        // Block 0 is never punched, even when free.
        store.free(0);
        let punched = store.zerofill_unused_blocks().expect("zerofill failed");
        assert_eq!(punched, 2);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_zerofill_zeroes_punched_blocks() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut store = store(dir.path(), 12);
        store.open(OpenMode::CreateIfMissing).expect("Failed to open");

        for block in 0..3u64 {
            store.allocate();
            let data = block_of(&store, 0xFF);
            store.write_block(&data, 1, block).expect("write failed");
        }
        store.free(1);
        store.zerofill_unused_blocks().expect("zerofill failed");

        let mut out = block_of(&store, 0xEE);
        store.read_block(&mut out, 1, 1).expect("read failed");
        assert!(out.iter().all(|&b| b == 0));

        // Neighbors survive.
        store.read_block(&mut out, 1, 2).expect("read failed");
        assert!(out.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_truncate_resets_state() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut store = store(dir.path(), 12);
        store.open(OpenMode::CreateIfMissing).expect("Failed to open");

        for block in 0..5u64 {
            store.allocate();
            let data = block_of(&store, 1);
            store.write_block(&data, 1, block).expect("write failed");
        }
        store.free(2);

        store.truncate().expect("truncate failed");
        assert_eq!(store.block_count(), 0);
        assert_eq!(store.free_block_count(), 0);
        assert_eq!(store.write_block_count(), 0);
        assert_eq!(store.read_block_count(), 0);
        assert_eq!(store.dump_used(), "");
        assert_eq!(store.dump_valid(), "");
        assert!(dir.path().join("gs_cp_0_1.dat").exists());
        assert_eq!(store.file_size().unwrap(), 0);

        assert_eq!(store.allocate(), 0);
    }

    #[test]
    fn test_reopen_recovers_block_count() {
        let dir = tempdir().expect("Failed to create temp dir");
        {
            let mut store = store(dir.path(), 12);
            store.open(OpenMode::CreateIfMissing).expect("Failed to open");
            let data = block_of(&store, 5);
            for block in 0..3u64 {
                store.write_block(&data, 1, block).expect("write failed");
            }
            store.close();
        }

        let mut store = store(dir.path(), 12);
        let fresh = store.open(OpenMode::OpenExisting).expect("Failed to reopen");
        assert!(!fresh);
        assert_eq!(store.block_count(), 3);
        assert_eq!(store.free_block_count(), 3);

        let mut out = block_of(&store, 0);
        assert_eq!(store.read_block(&mut out, 1, 2).expect("read failed"), 1);
        assert!(out.iter().all(|&b| b == 5));
    }

    #[test]
    fn test_counter_resets() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut store = store(dir.path(), 12);
        store.open(OpenMode::CreateIfMissing).expect("Failed to open");

        let data = block_of(&store, 1);
        store.write_block(&data, 1, 0).expect("write failed");
        let mut out = block_of(&store, 0);
        store.read_block(&mut out, 1, 0).expect("read failed");

        assert_eq!(store.write_block_count(), 1);
        assert_eq!(store.read_block_count(), 1);

        store.reset_write_block_count();
        store.reset_read_block_count();
        store.reset_write_retry_count();
        store.reset_read_retry_count();
        assert_eq!(store.write_block_count(), 0);
        assert_eq!(store.read_block_count(), 0);
        assert_eq!(store.write_retry_count(), 0);
        assert_eq!(store.read_retry_count(), 0);
    }

    #[test]
    fn test_flush_advise_and_sizes() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut store = store(dir.path(), 12);
        store.open(OpenMode::CreateIfMissing).expect("Failed to open");

        assert_eq!(store.allocated_file_size().unwrap(), 0);

        let data = block_of(&store, 1);
        store.write_block(&data, 1, 0).expect("write failed");
        store.flush().expect("flush failed");
        store.advise(io::ADVICE_DONT_NEED);

        assert_eq!(store.file_size().unwrap(), 4096);
        assert!(store.filesystem_block_size().unwrap() > 0);
        assert!(store.dump().ends_with("gs_cp_0_1.dat"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn allocate_free_keeps_free_count_exact(ops in prop::collection::vec(any::<bool>(), 1..200)) {
            let dir = tempdir().expect("Failed to create temp dir");
            let mut store = store(dir.path(), 12);
            store.open(OpenMode::CreateIfMissing).expect("Failed to open");

            let mut live: Vec<u64> = Vec::new();
            for op in ops {
                if op || live.is_empty() {
                    let block = store.allocate();
                    prop_assert!(store.get_used(block));
                    // Never hand out a block twice while it is live.
                    prop_assert!(!live.contains(&block));
                    live.push(block);
                } else {
                    let block = live.swap_remove(live.len() / 2);
                    store.free(block);
                    prop_assert!(!store.get_used(block));
                }

                let mut zeros = 0u64;
                for i in 0..store.used.len() {
                    if !store.used.get(i) {
                        zeros += 1;
                    }
                }
                prop_assert_eq!(store.free_block_count(), zeros);
            }
        }
    }
}
