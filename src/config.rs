use std::path::PathBuf;
use std::time::Duration;

use crate::errconfig;
use crate::error::Result;
use crate::layout::{SPLIT_COUNT_LIMIT, STRIPE_SIZE_LIMIT};

/// Configuration for a checkpoint file store.
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    /// Block size exponent; blocks are `1 << block_exp_size` bytes.
    pub block_exp_size: u8,

    /// Base directory for the single-file layout.
    pub dir: PathBuf,

    /// Partition group identifier; appears in every file name.
    pub pg_id: u32,

    /// Number of backing files. 0 selects the single-file layout.
    pub split_count: u32,

    /// Run length of consecutive blocks per file, in blocks.
    pub stripe_size: u32,

    /// Directories for split files, assigned round-robin per slot.
    pub dir_list: Vec<PathBuf>,

    /// I/O slower than this is reported as long I/O (default: 60s).
    pub io_warning_threshold: Duration,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            block_exp_size: 16,
            dir: PathBuf::from("."),
            pg_id: 0,
            split_count: 0,
            stripe_size: 0,
            dir_list: Vec::new(),
            io_warning_threshold: Duration::from_millis(60_000),
        }
    }
}

impl CheckpointConfig {
    /// Create a new config with the given block size exponent and directory.
    pub fn new(block_exp_size: u8, dir: impl Into<PathBuf>) -> Self {
        Self {
            block_exp_size,
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the partition group identifier.
    pub fn pg_id(mut self, pg_id: u32) -> Self {
        self.pg_id = pg_id;
        self
    }

    /// Set the number of backing files (0 for the single-file layout).
    pub fn split_count(mut self, split_count: u32) -> Self {
        self.split_count = split_count;
        self
    }

    /// Set the stripe size in blocks.
    pub fn stripe_size(mut self, stripe_size: u32) -> Self {
        self.stripe_size = stripe_size;
        self
    }

    /// Set the split file directories.
    pub fn dir_list(mut self, dirs: Vec<PathBuf>) -> Self {
        self.dir_list = dirs;
        self
    }

    /// Set the long I/O warning threshold.
    pub fn io_warning_threshold(mut self, threshold: Duration) -> Self {
        self.io_warning_threshold = threshold;
        self
    }

    /// Block size in bytes.
    pub fn block_size(&self) -> u64 {
        1u64 << self.block_exp_size
    }

    /// Checks the split/stripe parameters against the layout rules.
    pub fn validate(&self) -> Result<()> {
        if self.split_count == 0 {
            if !self.dir_list.is_empty() {
                return errconfig!(
                    "directory list has {} entries but split count is 0",
                    self.dir_list.len()
                );
            }
            return Ok(());
        }
        if self.dir_list.is_empty() {
            return errconfig!("split mode requires a non-empty directory list");
        }
        if self.dir_list.len() > self.split_count as usize {
            return errconfig!(
                "directory list has {} entries for split count {}",
                self.dir_list.len(),
                self.split_count
            );
        }
        if self.split_count > SPLIT_COUNT_LIMIT {
            return errconfig!(
                "split count {} exceeds the limit {SPLIT_COUNT_LIMIT}",
                self.split_count
            );
        }
        if self.stripe_size > STRIPE_SIZE_LIMIT {
            return errconfig!(
                "stripe size {} exceeds the limit {STRIPE_SIZE_LIMIT}",
                self.stripe_size
            );
        }
        for slot in 0..self.split_count as usize {
            let dir = &self.dir_list[slot % self.dir_list.len()];
            if dir.exists() && !dir.is_dir() {
                return errconfig!("path exists but is not a directory: {}", dir.display());
            }
        }
        Ok(())
    }
}
