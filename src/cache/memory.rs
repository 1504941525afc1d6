//! # In-Memory Block Cache
//!
//! A heap-backed [`BlockCache`] holding every block in one contiguous
//! allocation. There is nothing to evict and nothing to sync; the value of
//! this backend is determinism and observability, which is why tests and
//! benches use it:
//!
//! - read/write counters expose how much block traffic an operation costs,
//! - the allocation set, maintained purely from the advisory
//!   `note_allocated` / `note_freed` calls, lets a test cross-check the
//!   allocator against the free list without touching block contents.

use eyre::{ensure, Result};
use hashbrown::HashSet;

use super::BlockCache;
use crate::config::NODE_HEADER_SIZE;

/// Heap-backed block cache for tests, benches and scratch indexes.
#[derive(Debug)]
pub struct MemoryCache {
    block_size: usize,
    data: Vec<u8>,
    live: HashSet<u32>,
    reads: u64,
    writes: u64,
}

impl MemoryCache {
    /// Creates a zero-filled cache of `block_count` blocks of `block_size`
    /// bytes each.
    pub fn new(block_size: usize, block_count: u32) -> Result<Self> {
        ensure!(
            block_size.is_power_of_two(),
            "block size {} is not a power of two",
            block_size
        );
        ensure!(
            block_size > NODE_HEADER_SIZE,
            "block size {} leaves no room after the {}-byte header",
            block_size,
            NODE_HEADER_SIZE
        );
        ensure!(block_count > 0, "cache must hold at least one block");

        Ok(Self {
            block_size,
            data: vec![0u8; block_size * block_count as usize],
            live: HashSet::new(),
            reads: 0,
            writes: 0,
        })
    }

    /// Number of whole-block reads served so far.
    pub fn reads(&self) -> u64 {
        self.reads
    }

    /// Number of whole-block writes absorbed so far.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Blocks currently marked allocated via the advisory notifications.
    pub fn allocated_blocks(&self) -> &HashSet<u32> {
        &self.live
    }

    fn range_of(&self, block_no: u32) -> Result<std::ops::Range<usize>> {
        ensure!(
            block_no < self.block_count(),
            "block {} out of bounds (block_count={})",
            block_no,
            self.block_count()
        );
        let start = block_no as usize * self.block_size;
        Ok(start..start + self.block_size)
    }
}

impl BlockCache for MemoryCache {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u32 {
        (self.data.len() / self.block_size) as u32
    }

    fn read_block(&mut self, block_no: u32, buf: &mut [u8]) -> Result<()> {
        ensure!(
            buf.len() == self.block_size,
            "read buffer is {} bytes, block size is {}",
            buf.len(),
            self.block_size
        );
        let range = self.range_of(block_no)?;
        buf.copy_from_slice(&self.data[range]);
        self.reads += 1;
        Ok(())
    }

    fn write_block(&mut self, block_no: u32, data: &[u8]) -> Result<()> {
        ensure!(
            data.len() == self.block_size,
            "write of {} bytes, block size is {}",
            data.len(),
            self.block_size
        );
        let range = self.range_of(block_no)?;
        self.data[range].copy_from_slice(data);
        self.writes += 1;
        Ok(())
    }

    fn note_allocated(&mut self, block_no: u32) {
        self.live.insert(block_no);
    }

    fn note_freed(&mut self, block_no: u32) {
        self.live.remove(&block_no);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two_block_size() {
        assert!(MemoryCache::new(100, 4).is_err());
    }

    #[test]
    fn rejects_block_size_smaller_than_header() {
        assert!(MemoryCache::new(16, 4).is_err());
    }

    #[test]
    fn blocks_round_trip() {
        let mut cache = MemoryCache::new(64, 4).unwrap();
        let block = [0xA5u8; 64];

        cache.write_block(2, &block).unwrap();

        let mut out = [0u8; 64];
        cache.read_block(2, &mut out).unwrap();
        assert_eq!(out, block);
        assert_eq!(cache.reads(), 1);
        assert_eq!(cache.writes(), 1);
    }

    #[test]
    fn fresh_blocks_read_as_zeroes() {
        let mut cache = MemoryCache::new(64, 2).unwrap();
        let mut out = [0xFFu8; 64];

        cache.read_block(1, &mut out).unwrap();

        assert_eq!(out, [0u8; 64]);
    }

    #[test]
    fn out_of_bounds_block_is_an_error() {
        let mut cache = MemoryCache::new(64, 2).unwrap();
        let mut buf = [0u8; 64];

        let err = cache.read_block(2, &mut buf).unwrap_err();
        assert!(err.to_string().contains("out of bounds"));
    }

    #[test]
    fn wrong_buffer_length_is_an_error() {
        let mut cache = MemoryCache::new(64, 2).unwrap();
        let mut short = [0u8; 32];

        assert!(cache.read_block(0, &mut short).is_err());
        assert!(cache.write_block(0, &short).is_err());
    }

    #[test]
    fn notifications_track_the_allocation_set() {
        let mut cache = MemoryCache::new(64, 8).unwrap();

        cache.note_allocated(3);
        cache.note_allocated(5);
        cache.note_freed(3);

        assert!(!cache.allocated_blocks().contains(&3));
        assert!(cache.allocated_blocks().contains(&5));
    }
}
