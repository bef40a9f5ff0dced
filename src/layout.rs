//! Striped block-to-file address mapping and checkpoint file naming.
//!
//! A store with split count `S` and stripe size `T` (in blocks) spreads its
//! logical block array over `S` backing files: runs of `T` consecutive
//! blocks rotate round-robin across the files. The math degenerates to the
//! identity mapping for `S == 1`, so the single-file layout takes the same
//! code path.

pub const FILE_BASE_NAME: &str = "gs_cp_";
pub const FILE_EXTENSION: &str = ".dat";
pub const FILE_SEPARATOR: &str = "_";

/// Upper bound on the number of backing files.
pub const SPLIT_COUNT_LIMIT: u32 = 128;
/// Upper bound on the stripe size, in blocks.
pub const STRIPE_SIZE_LIMIT: u32 = 1 << 20;

/// Pure mapping from byte offsets in the logical block array to a backing
/// file and a byte offset within it. Fixed at construction; the mapping of
/// any given block never changes for the lifetime of a store.
#[derive(Debug, Clone, Copy)]
pub struct BlockLayout {
    block_exp: u8,
    split_count: u64,
    stripe_size: u64,
}

impl BlockLayout {
    /// `split_count == 0` (non-split) and `stripe_size == 0` both normalize
    /// to 1 so the general formulas stay division-safe.
    pub fn new(block_exp: u8, split_count: u32, stripe_size: u32) -> Self {
        Self {
            block_exp,
            split_count: u64::from(split_count.max(1)),
            stripe_size: u64::from(stripe_size.max(1)),
        }
    }

    pub fn block_size(&self) -> u64 {
        1u64 << self.block_exp
    }

    pub fn block_exp(&self) -> u8 {
        self.block_exp
    }

    pub fn split_count(&self) -> u32 {
        self.split_count as u32
    }

    /// Index of the backing file holding the given byte offset.
    #[inline]
    pub fn file_index(&self, offset: u64) -> usize {
        let block = offset >> self.block_exp;
        ((block / self.stripe_size) % self.split_count) as usize
    }

    /// Byte offset within the selected backing file. Intra-block byte
    /// remainders are preserved so sub-block writers can address metadata.
    #[inline]
    pub fn file_offset(&self, offset: u64) -> u64 {
        let block = offset >> self.block_exp;
        let local = (block / self.stripe_size / self.split_count) * self.stripe_size
            + block % self.stripe_size;
        (local << self.block_exp) | (offset & (self.block_size() - 1))
    }
}

/// Formats the on-disk name of one checkpoint file slot.
pub fn file_name(pg_id: u32, slot: i32) -> String {
    format!("{FILE_BASE_NAME}{pg_id}{FILE_SEPARATOR}{slot}{FILE_EXTENSION}")
}

/// Decomposes a checkpoint file name into `(pgId, splitId)`.
///
/// Recognizes exactly `gs_cp_<uint>_<int>.dat`; anything else returns `None`
/// without error.
pub fn parse_file_name(name: &str) -> Option<(u32, i32)> {
    let rest = name.strip_prefix(FILE_BASE_NAME)?;
    let rest = rest.strip_suffix(FILE_EXTENSION)?;
    let (pg, split) = rest.split_once('_')?;
    if pg.is_empty() || !pg.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let pg_id = pg.parse::<u32>().ok()?;
    let split_id = split.parse::<i32>().ok()?;
    Some((pg_id, split_id))
}
