//! # Block Cache Layer
//!
//! The index never touches storage directly; every read and write goes
//! through the [`BlockCache`] trait, a thin façade over whatever holds the
//! blocks. A cache exposes fixed geometry (block size, block count),
//! whole-block reads and writes, and two advisory notifications the
//! allocator raises when a block changes hands.
//!
//! ## Contract
//!
//! - `block_size()` is a fixed power of two and never changes for the
//!   lifetime of the cache.
//! - `read_block` fills a caller buffer of exactly `block_size()` bytes;
//!   `write_block` consumes one. Partial-block transfers do not exist at
//!   this layer.
//! - `note_allocated` / `note_freed` are advisory: the cache may use them to
//!   prioritize eviction or track statistics, but correctness does not
//!   depend on them. The default implementations do nothing.
//! - `sync` pushes buffered state to the backing store. In-memory caches
//!   treat it as a no-op.
//!
//! The cache does not interpret block contents. All typing (superblock,
//! tree nodes, free blocks) lives in the `btree` layer.
//!
//! ## Implementations
//!
//! - [`MemoryCache`]: heap-backed, with read/write counters and an
//!   allocation set fed by the notifications. Used by tests and benches.
//! - [`MmapCache`]: a memory-mapped file, the persistent backend used by
//!   the shell.

mod memory;
mod mmap;

pub use memory::MemoryCache;
pub use mmap::MmapCache;

use eyre::Result;

/// Whole-block storage access with advisory allocation notifications.
pub trait BlockCache {
    /// Fixed bytes per block, a power of two.
    fn block_size(&self) -> usize;

    /// Total number of addressable blocks.
    fn block_count(&self) -> u32;

    /// Reads block `block_no` into `buf`, which must be exactly
    /// `block_size()` bytes.
    fn read_block(&mut self, block_no: u32, buf: &mut [u8]) -> Result<()>;

    /// Writes `data`, which must be exactly `block_size()` bytes, to block
    /// `block_no`.
    fn write_block(&mut self, block_no: u32, data: &[u8]) -> Result<()>;

    /// Advisory: `block_no` has just been taken off the free list.
    fn note_allocated(&mut self, _block_no: u32) {}

    /// Advisory: `block_no` has just been returned to the free list.
    fn note_freed(&mut self, _block_no: u32) {}

    /// Flushes buffered state to the backing store.
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}
